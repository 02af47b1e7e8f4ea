//! The event loop: registration surface, the dispatch cycle, and
//! lifecycle.
//!
//! A cycle runs in a fixed order. The next timer deadline bounds the
//! poll timeout, the backend waits, raw readiness records are coalesced
//! into at most one event per descriptor, file callbacks run in
//! read-before-write order (reversed by `BARRIER`), the after-poll hook
//! runs, and finally due timers fire. Callbacks are free to mutate the
//! loop that invoked them; changes land in the next cycle except where
//! the same-cycle liveness re-checks below notice them earlier.

use crate::error::Error;
use crate::event::{EventMask, FileCallback, FiredEvent, Hook, RunFlags};
use crate::files::FileTable;
use crate::poller::{Poller, SysPoller};
use crate::timer::{TimerId, TimerQueue};

use log::{debug, trace};
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// A single-threaded event loop dispatching descriptor readiness and
/// timer callbacks.
///
/// The loop owns:
/// - the platform polling backend,
/// - the descriptor-indexed registration table,
/// - the timer queue,
/// - the per-cycle readiness buffers.
///
/// It never owns the descriptors themselves: the caller opens and
/// closes them, and must unregister interest before (or immediately
/// after) closing, since a closed-but-registered descriptor is
/// undefined at the OS level.
///
/// # Examples
///
/// ```rust,ignore
/// let mut el = EventLoop::with_capacity(1024)?;
/// el.register_file(listener_fd, EventMask::READABLE, on_accept)?;
/// el.schedule_repeating(Duration::from_millis(100), on_tick);
/// el.run();
/// ```
pub struct EventLoop {
    /// Platform polling backend, fixed for the loop's lifetime.
    poller: SysPoller,

    /// Descriptor registrations.
    files: FileTable,

    /// Scheduled callbacks.
    timers: TimerQueue,

    /// Raw records from the last poll, possibly several per descriptor.
    raw: Vec<FiredEvent>,

    /// Coalesced batch, at most one record per descriptor.
    fired: Vec<FiredEvent>,

    /// Set by [`stop`](Self::stop); observed between cycles.
    stop: bool,

    /// Forces a zero poll timeout on every cycle.
    nonblocking_polls: bool,

    /// Hook invoked by [`run`](Self::run) before each poll.
    before_poll: Option<Hook>,

    /// Hook invoked between file and timer dispatch.
    after_poll: Option<Hook>,
}

impl EventLoop {
    /// Creates a loop able to address descriptors `0..capacity`.
    ///
    /// Fails only if the backend cannot obtain its kernel resource.
    pub fn with_capacity(capacity: usize) -> Result<Self, Error> {
        let poller = SysPoller::with_capacity(capacity).map_err(|source| Error::Create { source })?;

        let el = Self {
            poller,
            files: FileTable::with_capacity(capacity),
            timers: TimerQueue::new(),
            raw: Vec::new(),
            fired: Vec::new(),
            stop: false,
            nonblocking_polls: false,
            before_poll: None,
            after_poll: None,
        };

        debug!(
            "event loop created (backend: {}, capacity: {})",
            el.poller.name(),
            capacity
        );

        Ok(el)
    }

    /// Number of addressable descriptors.
    pub fn capacity(&self) -> usize {
        self.files.capacity()
    }

    /// Name of the kernel mechanism behind this loop.
    pub fn backend_name(&self) -> &'static str {
        self.poller.name()
    }

    /// Interest currently registered for `fd`, empty when none.
    pub fn interest(&self, fd: RawFd) -> EventMask {
        self.files.interest(fd)
    }

    /// Grows (or shrinks) the addressable descriptor range.
    ///
    /// Every live registration is preserved. Fails if a descriptor at
    /// or above the requested capacity is still registered, or if the
    /// backend cannot rebuild its buffers; the loop then stays at its
    /// previous capacity, fully usable.
    pub fn resize(&mut self, capacity: usize) -> Result<(), Error> {
        if capacity == self.files.capacity() {
            return Ok(());
        }

        if let Some(highest) = self.files.maxfd() {
            if highest as usize >= capacity {
                return Err(Error::ResizeBelowWatermark {
                    requested: capacity,
                    highest,
                });
            }
        }

        self.poller
            .resize(capacity)
            .map_err(|source| Error::Resize { source })?;
        self.files.resize(capacity);

        debug!("event loop resized (capacity: {capacity})");
        Ok(())
    }

    /// Registers `callback` for the READABLE/WRITABLE bits in `mask`
    /// on `fd`, merging with any existing registration.
    ///
    /// Interest bits accumulate across calls; the callback for a bit
    /// that already had one is replaced. Passing both bits in one call
    /// installs the same callback handle for both, and the dispatcher
    /// will invoke that handle at most once per cycle. Add
    /// [`EventMask::BARRIER`] to have write dispatch precede read
    /// dispatch for this descriptor.
    ///
    /// On failure the table is untouched and the caller must treat the
    /// registration as absent for every requested bit.
    pub fn register_file(
        &mut self,
        fd: RawFd,
        mask: EventMask,
        callback: impl Fn(&mut EventLoop, RawFd, EventMask) + 'static,
    ) -> Result<(), Error> {
        if fd < 0 || fd as usize >= self.files.capacity() {
            return Err(Error::OutOfRange {
                fd,
                capacity: self.files.capacity(),
            });
        }

        self.poller
            .add(fd, mask)
            .map_err(|source| Error::Register { fd, source })?;
        self.files.register(fd, mask, Rc::new(callback));

        Ok(())
    }

    /// Drops interest for the bits in `mask` on `fd`, best effort.
    ///
    /// Unknown descriptors and unregistered bits are silently
    /// tolerated; the descriptor may already be closed. Removing
    /// WRITABLE also removes BARRIER, which has no meaning without a
    /// write side.
    pub fn unregister_file(&mut self, fd: RawFd, mask: EventMask) {
        if fd < 0 || fd as usize >= self.files.capacity() {
            return;
        }
        if self.files.get(fd).is_none() {
            return;
        }

        let mut mask = mask;
        if mask.contains(EventMask::WRITABLE) {
            mask |= EventMask::BARRIER;
        }

        self.files.unregister(fd, mask);
        self.poller.del(fd, mask);
    }

    /// Schedules `callback` to run once after `delay`.
    pub fn schedule_timer(
        &mut self,
        delay: Duration,
        callback: impl Fn(&mut EventLoop, TimerId) + 'static,
    ) -> TimerId {
        self.timers.schedule(delay, None, Rc::new(callback))
    }

    /// Schedules `callback` to run every `interval`, first after one
    /// interval.
    ///
    /// After each firing the entry is re-armed at `now + interval`,
    /// where `now` is taken once the callback returns. A loop stalled
    /// past several periods therefore fires once and resumes its
    /// cadence, it does not replay the missed firings.
    pub fn schedule_repeating(
        &mut self,
        interval: Duration,
        callback: impl Fn(&mut EventLoop, TimerId) + 'static,
    ) -> TimerId {
        self.timers.schedule(interval, Some(interval), Rc::new(callback))
    }

    /// Cancels a scheduled timer.
    ///
    /// Safe to call from any callback, including the timer's own, and
    /// safe to call with an already-fired or unknown id. A cancelled
    /// timer never fires again, even later in the cycle that cancelled
    /// it.
    pub fn cancel_timer(&mut self, id: TimerId) {
        self.timers.cancel(id);
    }

    /// Installs the hook [`run`](Self::run) invokes before each poll.
    pub fn set_before_poll(&mut self, hook: impl Fn(&mut EventLoop) + 'static) {
        self.before_poll = Some(Rc::new(hook));
    }

    pub fn clear_before_poll(&mut self) {
        self.before_poll = None;
    }

    /// Installs the hook invoked between file and timer dispatch.
    pub fn set_after_poll(&mut self, hook: impl Fn(&mut EventLoop) + 'static) {
        self.after_poll = Some(Rc::new(hook));
    }

    pub fn clear_after_poll(&mut self) {
        self.after_poll = None;
    }

    /// When set, every poll uses a zero timeout regardless of timers,
    /// as if [`RunFlags::DONT_BLOCK`] were passed on every cycle.
    pub fn set_nonblocking_polls(&mut self, on: bool) {
        self.nonblocking_polls = on;
    }

    /// Requests that [`run`](Self::run) return after the current cycle.
    pub fn stop(&mut self) {
        trace!("loop stop requested");
        self.stop = true;
    }

    /// Runs cycles until [`stop`](Self::stop) is observed.
    ///
    /// Each iteration invokes the before-poll hook, then processes one
    /// full cycle with [`RunFlags::ALL_EVENTS`] and the after-poll
    /// hook enabled. A stop requested while the loop was not running
    /// is discarded on entry.
    ///
    /// # Panics
    ///
    /// Panics whenever [`run_once`](Self::run_once) would.
    pub fn run(&mut self) {
        self.stop = false;

        while !self.stop {
            if let Some(hook) = self.before_poll.clone() {
                (*hook)(self);
            }

            self.run_once(RunFlags::ALL_EVENTS | RunFlags::CALL_AFTER_HOOK);
        }
    }

    /// Processes one poll/dispatch cycle and returns the number of
    /// callback invocations it delivered.
    ///
    /// The poll is skipped entirely when no descriptor is registered
    /// and no blocking timer wait is wanted; with neither
    /// [`RunFlags::FILE_EVENTS`] nor [`RunFlags::TIME_EVENTS`] set the
    /// call does nothing.
    ///
    /// # Panics
    ///
    /// Panics if the backend's wait syscall fails with anything other
    /// than a signal interruption.
    pub fn run_once(&mut self, flags: RunFlags) -> usize {
        let mut processed = 0;

        if !flags.intersects(RunFlags::FILE_EVENTS | RunFlags::TIME_EVENTS) {
            return 0;
        }

        if self.files.maxfd().is_some()
            || (flags.contains(RunFlags::TIME_EVENTS) && !flags.contains(RunFlags::DONT_BLOCK))
        {
            let timeout = self.poll_timeout(flags);
            self.poll_backend(timeout);
            self.coalesce();
            processed += self.dispatch_fired();

            if flags.contains(RunFlags::CALL_AFTER_HOOK) {
                if let Some(hook) = self.after_poll.clone() {
                    (*hook)(self);
                }
            }
        }

        if flags.contains(RunFlags::TIME_EVENTS) {
            processed += self.process_time_events();
        }

        processed
    }

    /// Computes how long the next poll may block.
    fn poll_timeout(&self, flags: RunFlags) -> Option<Duration> {
        if flags.contains(RunFlags::DONT_BLOCK) || self.nonblocking_polls {
            return Some(Duration::ZERO);
        }

        if flags.contains(RunFlags::TIME_EVENTS) {
            if let Some(deadline) = self.timers.next_deadline() {
                return Some(deadline.saturating_duration_since(Instant::now()));
            }
        }

        None
    }

    /// Polls the backend into the raw buffer, absorbing signal
    /// interruptions.
    ///
    /// Retries recompute the remaining wait against the absolute
    /// deadline of the original request, so interruptions neither
    /// extend nor truncate it. Any other poll failure means the loop
    /// cannot continue at all.
    fn poll_backend(&mut self, timeout: Option<Duration>) {
        let deadline = timeout.map(|t| Instant::now() + t);

        self.raw.clear();

        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));

            match self.poller.poll(&mut self.raw, remaining) {
                Ok(_) => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                    trace!("poll interrupted by a signal, retrying");
                }
                Err(err) => panic!("event poll failed: {err}"),
            }
        }
    }

    /// Merges raw records into at most one event per descriptor.
    ///
    /// Some backends split read and write readiness for one descriptor
    /// into two records; the union built here is what guarantees each
    /// callback runs at most once per cycle.
    fn coalesce(&mut self) {
        self.fired.clear();

        for record in &self.raw {
            if let Some(event) = self.fired.iter_mut().find(|e| e.fd == record.fd) {
                event.mask |= record.mask;
            } else {
                self.fired.push(*record);
            }
        }
    }

    /// Dispatches the coalesced batch.
    fn dispatch_fired(&mut self) -> usize {
        let mut processed = 0;

        let fired = std::mem::take(&mut self.fired);
        for event in &fired {
            processed += self.dispatch_file(event.fd, event.mask);
        }
        self.fired = fired;

        processed
    }

    /// Runs the callbacks one descriptor's readiness calls for.
    ///
    /// Read runs before write unless the registration carries
    /// `BARRIER`, in which case the order inverts. The registration is
    /// looked up again before every invocation: the previous callback
    /// may have unregistered or replaced what was about to run, and a
    /// vanished callback is simply skipped.
    fn dispatch_file(&mut self, fd: RawFd, ready: EventMask) -> usize {
        let Some(entry) = self.files.get(fd) else {
            return 0;
        };

        let invert = entry.mask.contains(EventMask::BARRIER);
        let mut calls = 0;

        if !invert {
            if let Some(callback) = self.runnable(fd, ready, EventMask::READABLE, false) {
                (*callback)(self, fd, ready);
                calls += 1;
            }
        }

        if let Some(callback) = self.runnable(fd, ready, EventMask::WRITABLE, calls > 0) {
            (*callback)(self, fd, ready);
            calls += 1;
        }

        if invert {
            if let Some(callback) = self.runnable(fd, ready, EventMask::READABLE, calls > 0) {
                (*callback)(self, fd, ready);
                calls += 1;
            }
        }

        calls
    }

    /// Looks up the callback for `bit` if the registration still wants
    /// it and `ready` delivers it.
    ///
    /// When one handle serves both directions and a callback already
    /// ran for this descriptor this cycle, the second invocation is
    /// suppressed: a handle runs at most once per descriptor per
    /// cycle.
    fn runnable(
        &self,
        fd: RawFd,
        ready: EventMask,
        bit: EventMask,
        already_fired: bool,
    ) -> Option<FileCallback> {
        let entry = self.files.get(fd)?;

        if !entry.mask.intersection(ready).contains(bit) {
            return None;
        }

        if already_fired && same_handle(&entry.read_cb, &entry.write_cb) {
            return None;
        }

        if bit == EventMask::READABLE {
            entry.read_cb.clone()
        } else {
            entry.write_cb.clone()
        }
    }

    /// Fires every live timer whose deadline has elapsed, oldest id
    /// first.
    ///
    /// Entries created inside this pass wait for the next one, and the
    /// clock is re-read after every callback so repeating entries
    /// re-arm relative to the time their work finished.
    fn process_time_events(&mut self) -> usize {
        let fence = self.timers.fence();
        self.timers.purge();

        let mut processed = 0;
        let mut now = Instant::now();
        let mut idx = 0;

        while idx < self.timers.entries.len() {
            let entry = &self.timers.entries[idx];

            if entry.dead || entry.id.0 >= fence || entry.deadline > now {
                idx += 1;
                continue;
            }

            let id = entry.id;
            let callback = Rc::clone(&entry.callback);
            (*callback)(self, id);
            processed += 1;

            now = Instant::now();

            // Re-found by id: the callback may have cancelled this very
            // entry, and a tombstoned entry must not re-arm.
            if let Some(entry) = self.timers.entries.iter_mut().find(|e| e.id == id) {
                if !entry.dead {
                    match entry.interval {
                        Some(interval) => entry.deadline = now + interval,
                        None => entry.dead = true,
                    }
                }
            }

            idx += 1;
        }

        processed
    }
}

/// Whether two callback slots hold the same handle.
fn same_handle(a: &Option<FileCallback>, b: &Option<FileCallback>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}
