use crate::core::EventLoop;
use crate::timer::TimerId;

use bitflags::bitflags;
use std::os::fd::RawFd;
use std::rc::Rc;

bitflags! {
    /// Interest and readiness bits for a registered file descriptor.
    ///
    /// The same type describes both what a registration wants to be
    /// notified about (its interest mask) and what a poll cycle actually
    /// observed (its ready mask). `BARRIER` only ever appears in interest
    /// masks: it does not describe readiness, it reverses the dispatch
    /// order for the descriptor that carries it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventMask: u8 {
        /// The descriptor can be read without blocking.
        const READABLE = 1 << 0;

        /// The descriptor can be written without blocking.
        const WRITABLE = 1 << 1;

        /// Fire the write callback before the read callback.
        ///
        /// Ordinarily a descriptor that is both readable and writable has
        /// its read callback invoked first. A registration carrying this
        /// bit is dispatched write-first, which lets a caller flush
        /// pending output before consuming more input.
        const BARRIER = 1 << 2;
    }
}

bitflags! {
    /// Behavior flags for a single [`EventLoop::run_once`] cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RunFlags: u8 {
        /// Dispatch file events this cycle.
        const FILE_EVENTS = 1 << 0;

        /// Dispatch due timers this cycle.
        const TIME_EVENTS = 1 << 1;

        /// Poll with a zero timeout instead of sleeping until the next
        /// timer deadline.
        const DONT_BLOCK = 1 << 2;

        /// Invoke the after-poll hook between file and timer dispatch.
        const CALL_AFTER_HOOK = 1 << 3;

        /// Both event classes, the usual steady-state request.
        const ALL_EVENTS = Self::FILE_EVENTS.bits() | Self::TIME_EVENTS.bits();
    }
}

/// Readiness observed for one descriptor.
///
/// Backends append one `FiredEvent` per raw kernel record; the dispatcher
/// then coalesces records that share a descriptor into a single logical
/// event before any callback runs. Fired events never survive a cycle.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FiredEvent {
    /// The descriptor the kernel reported on.
    pub(crate) fd: RawFd,

    /// Union of the ready bits seen in this record.
    pub(crate) mask: EventMask,
}

/// Handle to a file-event callback.
///
/// Stored per registered mask bit and cloned before every invocation, so
/// the callback body is free to mutate the loop that holds it. Handle
/// identity (`Rc::ptr_eq`) is what the dispatcher uses to avoid invoking
/// a callback twice when one handle serves both directions.
pub(crate) type FileCallback = Rc<dyn Fn(&mut EventLoop, RawFd, EventMask)>;

/// Handle to a timer callback.
pub(crate) type TimerCallback = Rc<dyn Fn(&mut EventLoop, TimerId)>;

/// Handle to a before-poll or after-poll hook.
pub(crate) type Hook = Rc<dyn Fn(&mut EventLoop)>;
