//! Linux `epoll`-based backend.
//!
//! Responsibilities:
//! - Maintain one `epoll` instance per loop
//! - Translate interest masks into `EPOLL_CTL_ADD`/`MOD`/`DEL` calls
//! - Block waiting for readiness, bounded by the dispatcher's timeout
//! - Report error and hangup conditions as both readable and writable,
//!   so whichever callback is registered observes the failure through
//!   its next syscall
//!
//! epoll reports one merged record per descriptor, so batches from this
//! backend are already close to coalesced; the dispatcher still owns
//! that step.
//!
//! This backend is selected automatically on Linux and Android targets.

use super::Poller;
use crate::event::{EventMask, FiredEvent};

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLOUT, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Linux `epoll` backend.
///
/// This backend owns:
/// - the `epoll` instance,
/// - a reusable kernel event buffer sized to the loop capacity,
/// - a per-descriptor record of the interest currently registered with
///   the kernel, needed to pick between `ADD` and `MOD` and to compute
///   the surviving mask on removal.
pub(crate) struct EpollPoller {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Reusable buffer for `epoll_wait` output.
    events: Vec<epoll_event>,

    /// Interest currently registered with the kernel, indexed by
    /// descriptor value.
    interest: Vec<EventMask>,
}

impl EpollPoller {
    /// Builds the `epoll_ctl` flag word for an interest mask.
    fn flags_for(mask: EventMask) -> u32 {
        let mut flags = 0;

        if mask.contains(EventMask::READABLE) {
            flags |= EPOLLIN;
        }
        if mask.contains(EventMask::WRITABLE) {
            flags |= EPOLLOUT;
        }

        flags as u32
    }
}

impl Poller for EpollPoller {
    fn with_capacity(capacity: usize) -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            epoll,
            // epoll_wait rejects maxevents == 0, and a loop with no
            // descriptor slots still polls for its timer sleeps.
            events: Vec::with_capacity(capacity.max(1)),
            interest: vec![EventMask::empty(); capacity],
        })
    }

    fn resize(&mut self, capacity: usize) -> io::Result<()> {
        self.interest.resize(capacity, EventMask::empty());
        self.events = Vec::with_capacity(capacity.max(1));
        Ok(())
    }

    fn add(&mut self, fd: RawFd, mask: EventMask) -> io::Result<()> {
        let slot = fd as usize;
        let current = self.interest[slot];
        let wanted = current | (mask & (EventMask::READABLE | EventMask::WRITABLE));

        if wanted == current {
            return Ok(());
        }

        let op = if current.is_empty() {
            EPOLL_CTL_ADD
        } else {
            EPOLL_CTL_MOD
        };

        let mut event = epoll_event {
            events: Self::flags_for(wanted),
            u64: fd as u64,
        };

        let rc = unsafe { epoll_ctl(self.epoll, op, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        self.interest[slot] = wanted;
        Ok(())
    }

    fn del(&mut self, fd: RawFd, mask: EventMask) {
        let slot = fd as usize;
        let Some(current) = self.interest.get(slot).copied() else {
            return;
        };

        let remaining = current - (mask & (EventMask::READABLE | EventMask::WRITABLE));
        if remaining == current {
            return;
        }

        // The descriptor may already be closed; the kernel's verdict is
        // ignored either way.
        if remaining.is_empty() {
            unsafe {
                epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut());
            }
        } else {
            let mut event = epoll_event {
                events: Self::flags_for(remaining),
                u64: fd as u64,
            };
            unsafe {
                epoll_ctl(self.epoll, EPOLL_CTL_MOD, fd, &mut event);
            }
        }

        self.interest[slot] = remaining;
    }

    fn poll(
        &mut self,
        fired: &mut Vec<FiredEvent>,
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        let timeout_ms = super::timeout_ms(timeout);

        self.events.clear();

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        for ev in &self.events {
            let mut mask = EventMask::empty();

            if ev.events & EPOLLIN as u32 != 0 {
                mask |= EventMask::READABLE;
            }
            if ev.events & EPOLLOUT as u32 != 0 {
                mask |= EventMask::WRITABLE;
            }
            if ev.events & (EPOLLERR | EPOLLHUP) as u32 != 0 {
                mask |= EventMask::READABLE | EventMask::WRITABLE;
            }

            fired.push(FiredEvent {
                fd: ev.u64 as RawFd,
                mask,
            });
        }

        Ok(n as usize)
    }

    fn name(&self) -> &'static str {
        "epoll"
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll);
        }
    }
}
