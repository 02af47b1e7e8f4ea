//! Platform-specific readiness multiplexing.
//!
//! This module defines the contract every polling backend satisfies and
//! selects the concrete implementation for the compilation target.
//!
//! A backend is responsible for:
//! - holding the kernel-side polling resource (one per loop),
//! - registering and removing per-descriptor read/write interest,
//! - blocking until readiness or a deadline, whichever comes first,
//! - handing raw readiness records back to the dispatcher.
//!
//! Backends do not interpret readiness: coalescing split records,
//! callback lookup, and ordering all happen in the dispatch loop. A
//! backend may legitimately report the same descriptor twice in one
//! batch (kqueue delivers read and write filters separately); the
//! dispatcher reconciles that.
//!
//! The concrete implementation is selected at compile time depending on
//! the target operating system: `epoll` on Linux and Android, `kqueue`
//! on the BSD family and macOS, event ports on illumos and Solaris, and
//! a portable `select` fallback elsewhere.

use crate::event::{EventMask, FiredEvent};

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd"
))]
mod kqueue;

#[cfg(any(target_os = "illumos", target_os = "solaris"))]
mod evport;

// The select fallback also builds under test on targets that have a
// native mechanism, so the contract suite below always covers two
// backends there.
#[cfg(any(
    test,
    not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "dragonfly",
        target_os = "openbsd",
        target_os = "illumos",
        target_os = "solaris"
    ))
))]
mod select;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) type SysPoller = epoll::EpollPoller;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd"
))]
pub(crate) type SysPoller = kqueue::KqueuePoller;

#[cfg(any(target_os = "illumos", target_os = "solaris"))]
pub(crate) type SysPoller = evport::EventPortPoller;

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd",
    target_os = "illumos",
    target_os = "solaris"
)))]
pub(crate) type SysPoller = select::SelectPoller;

/// Contract shared by every polling backend.
///
/// The loop owns exactly one implementor for its whole lifetime, chosen
/// by the target cfg above; kernel resources are released on drop.
pub(crate) trait Poller: Sized {
    /// Allocates the kernel resource and local buffers sized for
    /// `capacity` concurrent registrations.
    fn with_capacity(capacity: usize) -> io::Result<Self>;

    /// Grows (or shrinks) local buffers to `capacity` without
    /// disturbing existing registrations. On failure the backend stays
    /// usable at its previous capacity.
    fn resize(&mut self, capacity: usize) -> io::Result<()>;

    /// Registers interest for the READABLE/WRITABLE bits in `mask`.
    ///
    /// The caller keeps `fd` within the configured capacity; backends
    /// index per-descriptor state by it. Bits already registered are
    /// no-ops. Bits that cannot be registered atomically are attempted
    /// independently; the first failure is reported and any bit that
    /// did succeed stays in place, so the caller must treat an error as
    /// "registration absent".
    fn add(&mut self, fd: RawFd, mask: EventMask) -> io::Result<()>;

    /// Removes interest for the bits in `mask`, best effort.
    ///
    /// Never fails: the descriptor may already be closed or was never
    /// registered, and both are tolerated silently.
    fn del(&mut self, fd: RawFd, mask: EventMask);

    /// Waits for readiness and appends one record per kernel event to
    /// `fired`, returning how many were appended.
    ///
    /// `None` blocks indefinitely, `Some(ZERO)` returns immediately
    /// with whatever is already ready, and a positive timeout bounds
    /// the wait. A signal arriving mid-wait surfaces as
    /// [`io::ErrorKind::Interrupted`]; the dispatcher retries.
    fn poll(&mut self, fired: &mut Vec<FiredEvent>, timeout: Option<Duration>)
    -> io::Result<usize>;

    /// Name of the kernel mechanism, for diagnostics.
    fn name(&self) -> &'static str;
}

/// Converts an optional timeout into the millisecond form `epoll_wait`
/// and `poll` expect, with `-1` meaning "block indefinitely".
///
/// Sub-millisecond remainders round up so a short timer wait cannot
/// degenerate into a busy loop.
pub(crate) fn timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(t) => {
            let mut ms = t.as_millis();
            if t.subsec_nanos() % 1_000_000 != 0 {
                ms += 1;
            }
            ms.min(i32::MAX as u128) as i32
        }
    }
}
