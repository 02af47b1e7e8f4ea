//! Portable `select(2)` fallback backend.
//!
//! Responsibilities:
//! - Keep master read/write descriptor sets and a scan watermark
//! - Block in `select`, handing the kernel working copies of the sets
//! - Report one merged record per ready descriptor
//!
//! The mechanism caps the descriptor space at `FD_SETSIZE`; creating or
//! resizing a loop beyond that fails here rather than corrupting the
//! sets. Used on targets with none of the native mechanisms, and built
//! under test everywhere so the contract suite keeps it honest.

use super::Poller;
use crate::event::{EventMask, FiredEvent};

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// `select(2)` backend.
///
/// This backend owns:
/// - the master read and write `fd_set`s,
/// - its own highest-registered-descriptor watermark, bounding both the
///   `select` call and the readiness scan.
pub(crate) struct SelectPoller {
    /// Master read-interest set.
    rfds: libc::fd_set,

    /// Master write-interest set.
    wfds: libc::fd_set,

    /// Highest descriptor present in either set, `-1` when empty.
    maxfd: RawFd,
}

impl SelectPoller {
    fn bound_check(capacity: usize) -> io::Result<()> {
        if capacity > libc::FD_SETSIZE as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "select backend cannot address more than FD_SETSIZE descriptors",
            ));
        }
        Ok(())
    }

    fn registered(&self, fd: RawFd) -> bool {
        unsafe { libc::FD_ISSET(fd, &self.rfds) || libc::FD_ISSET(fd, &self.wfds) }
    }
}

impl Poller for SelectPoller {
    fn with_capacity(capacity: usize) -> io::Result<Self> {
        Self::bound_check(capacity)?;

        Ok(Self {
            rfds: unsafe { std::mem::zeroed() },
            wfds: unsafe { std::mem::zeroed() },
            maxfd: -1,
        })
    }

    fn resize(&mut self, capacity: usize) -> io::Result<()> {
        // The sets are fixed-size kernel structures; only the bound is
        // enforced here.
        Self::bound_check(capacity)
    }

    fn add(&mut self, fd: RawFd, mask: EventMask) -> io::Result<()> {
        if mask.contains(EventMask::READABLE) {
            unsafe { libc::FD_SET(fd, &mut self.rfds) };
        }
        if mask.contains(EventMask::WRITABLE) {
            unsafe { libc::FD_SET(fd, &mut self.wfds) };
        }

        if fd > self.maxfd {
            self.maxfd = fd;
        }

        Ok(())
    }

    fn del(&mut self, fd: RawFd, mask: EventMask) {
        if fd < 0 || fd as usize >= libc::FD_SETSIZE as usize {
            return;
        }

        if mask.contains(EventMask::READABLE) {
            unsafe { libc::FD_CLR(fd, &mut self.rfds) };
        }
        if mask.contains(EventMask::WRITABLE) {
            unsafe { libc::FD_CLR(fd, &mut self.wfds) };
        }

        if fd == self.maxfd && !self.registered(fd) {
            self.maxfd = (0..fd).rev().find(|&f| self.registered(f)).unwrap_or(-1);
        }
    }

    fn poll(
        &mut self,
        fired: &mut Vec<FiredEvent>,
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        // The kernel mutates the sets it is handed, so it gets working
        // copies of the masters.
        let mut out_r = self.rfds;
        let mut out_w = self.wfds;

        let mut tv;
        let tv_ptr = match timeout {
            Some(t) => {
                tv = libc::timeval {
                    tv_sec: t.as_secs() as libc::time_t,
                    tv_usec: t.subsec_micros() as libc::suseconds_t,
                };
                &mut tv as *mut libc::timeval
            }
            None => std::ptr::null_mut(),
        };

        let n = unsafe {
            libc::select(
                self.maxfd + 1,
                &mut out_r,
                &mut out_w,
                std::ptr::null_mut(),
                tv_ptr,
            )
        };

        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        if n == 0 {
            return Ok(0);
        }

        let mut appended = 0;
        for fd in 0..=self.maxfd {
            let readable = unsafe { libc::FD_ISSET(fd, &out_r) };
            let writable = unsafe { libc::FD_ISSET(fd, &out_w) };

            if !readable && !writable {
                continue;
            }

            let mut mask = EventMask::empty();
            if readable {
                mask |= EventMask::READABLE;
            }
            if writable {
                mask |= EventMask::WRITABLE;
            }

            fired.push(FiredEvent { fd, mask });
            appended += 1;
        }

        Ok(appended)
    }

    fn name(&self) -> &'static str {
        "select"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_capacity_beyond_fd_setsize() {
        let too_big = libc::FD_SETSIZE as usize + 1;

        assert!(SelectPoller::with_capacity(too_big).is_err());

        let mut poller = SelectPoller::with_capacity(64).expect("Failed to create poller");
        assert!(poller.resize(too_big).is_err());
        assert!(poller.resize(libc::FD_SETSIZE as usize).is_ok());
    }

    #[test]
    fn watermark_falls_back_after_removal() {
        let mut poller = SelectPoller::with_capacity(64).expect("Failed to create poller");

        poller.add(3, EventMask::READABLE).expect("Failed to add");
        poller.add(7, EventMask::WRITABLE).expect("Failed to add");
        assert_eq!(poller.maxfd, 7);

        poller.del(7, EventMask::WRITABLE);
        assert_eq!(poller.maxfd, 3);

        poller.del(3, EventMask::READABLE);
        assert_eq!(poller.maxfd, -1);
    }
}
