//! BSD `kqueue`-based backend.
//!
//! Responsibilities:
//! - Maintain one kernel event queue per loop
//! - Register read and write interest as independent `EVFILT_READ` /
//!   `EVFILT_WRITE` filters
//! - Block waiting for readiness, bounded by the dispatcher's timeout
//!
//! kqueue delivers each filter as its own record, so a descriptor that
//! is both readable and writable shows up twice in one batch. The
//! records are handed over as-is; the dispatcher coalesces them.
//!
//! This backend is selected automatically on macOS, iOS, FreeBSD,
//! DragonFly and OpenBSD targets.

use super::Poller;
use crate::event::{EventMask, FiredEvent};

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// BSD `kqueue` backend.
///
/// This backend owns:
/// - the kqueue file descriptor,
/// - a reusable kernel event buffer sized to the loop capacity.
///
/// No per-descriptor bookkeeping is needed: the two filters are
/// independent kernel objects, re-adding one is an update and deleting
/// a missing one is an error the removal path ignores.
pub(crate) struct KqueuePoller {
    /// Kqueue file descriptor.
    kqueue: RawFd,

    /// Reusable buffer for `kevent` output.
    events: Vec<libc::kevent>,
}

impl KqueuePoller {
    /// Applies a single filter change to the kernel queue.
    fn change(&self, fd: RawFd, filter: i16, flags: u16) -> io::Result<()> {
        let mut change: libc::kevent = unsafe { std::mem::zeroed() };
        change.ident = fd as usize;
        change.filter = filter;
        change.flags = flags;

        let rc = unsafe {
            libc::kevent(
                self.kqueue,
                &change,
                1,
                std::ptr::null_mut(),
                0,
                std::ptr::null(),
            )
        };

        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }
}

impl Poller for KqueuePoller {
    fn with_capacity(capacity: usize) -> io::Result<Self> {
        let kqueue = unsafe { libc::kqueue() };
        if kqueue < 0 {
            return Err(io::Error::last_os_error());
        }

        unsafe {
            libc::fcntl(kqueue, libc::F_SETFD, libc::FD_CLOEXEC);
        }

        Ok(Self {
            kqueue,
            // kevent with zero output slots returns without waiting;
            // one slot keeps timer sleeps honest.
            events: Vec::with_capacity(capacity.max(1)),
        })
    }

    fn resize(&mut self, capacity: usize) -> io::Result<()> {
        self.events = Vec::with_capacity(capacity.max(1));
        Ok(())
    }

    fn add(&mut self, fd: RawFd, mask: EventMask) -> io::Result<()> {
        let mut first_err = None;

        if mask.contains(EventMask::READABLE) {
            if let Err(e) = self.change(fd, libc::EVFILT_READ, libc::EV_ADD) {
                first_err.get_or_insert(e);
            }
        }
        if mask.contains(EventMask::WRITABLE) {
            if let Err(e) = self.change(fd, libc::EVFILT_WRITE, libc::EV_ADD) {
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn del(&mut self, fd: RawFd, mask: EventMask) {
        if mask.contains(EventMask::READABLE) {
            let _ = self.change(fd, libc::EVFILT_READ, libc::EV_DELETE);
        }
        if mask.contains(EventMask::WRITABLE) {
            let _ = self.change(fd, libc::EVFILT_WRITE, libc::EV_DELETE);
        }
    }

    fn poll(
        &mut self,
        fired: &mut Vec<FiredEvent>,
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        self.events.clear();

        let ts;
        let ts_ptr = match timeout {
            Some(t) => {
                ts = libc::timespec {
                    tv_sec: t.as_secs() as libc::time_t,
                    tv_nsec: t.subsec_nanos() as libc::c_long,
                };
                &ts as *const libc::timespec
            }
            None => std::ptr::null(),
        };

        let n = unsafe {
            libc::kevent(
                self.kqueue,
                std::ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.capacity() as libc::c_int,
                ts_ptr,
            )
        };

        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        let mut appended = 0;
        for ev in &self.events {
            let mask = match ev.filter {
                libc::EVFILT_READ => EventMask::READABLE,
                libc::EVFILT_WRITE => EventMask::WRITABLE,
                _ => continue,
            };

            fired.push(FiredEvent {
                fd: ev.ident as RawFd,
                mask,
            });
            appended += 1;
        }

        Ok(appended)
    }

    fn name(&self) -> &'static str {
        "kqueue"
    }
}

impl Drop for KqueuePoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kqueue);
        }
    }
}
