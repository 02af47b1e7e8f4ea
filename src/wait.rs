//! One-off readiness wait for a single descriptor, outside any loop.

use crate::event::EventMask;
use crate::poller::timeout_ms;

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Blocks the calling thread until `fd` is ready for `mask` or
/// `timeout` elapses; `None` waits indefinitely.
///
/// Returns the readiness actually observed, empty on timeout. Error
/// and hangup conditions report as both readable and writable, the
/// same folding the loop's backends apply, so the caller's next read
/// or write attempt surfaces the failure.
pub fn wait(fd: RawFd, mask: EventMask, timeout: Option<Duration>) -> io::Result<EventMask> {
    let mut events: libc::c_short = 0;
    if mask.contains(EventMask::READABLE) {
        events |= libc::POLLIN;
    }
    if mask.contains(EventMask::WRITABLE) {
        events |= libc::POLLOUT;
    }

    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };

    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms(timeout)) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    if rc == 0 {
        return Ok(EventMask::empty());
    }

    let mut ready = EventMask::empty();
    if pfd.revents & libc::POLLIN != 0 {
        ready |= EventMask::READABLE;
    }
    if pfd.revents & libc::POLLOUT != 0 {
        ready |= EventMask::WRITABLE;
    }
    if pfd.revents & (libc::POLLERR | libc::POLLHUP) != 0 {
        ready |= EventMask::READABLE | EventMask::WRITABLE;
    }

    Ok(ready)
}
