//! illumos/Solaris event-ports backend.
//!
//! Responsibilities:
//! - Maintain one event port per loop
//! - Keep a per-descriptor record of desired interest, since the kernel
//!   forgets it on every delivery
//! - Re-associate delivered descriptors at the top of the next poll
//!
//! Event ports are one-shot: retrieving an event dissociates its
//! descriptor. Delivered descriptors are parked on a pending list and
//! re-armed with their surviving interest right before the next wait,
//! so interest changes made by callbacks in between are honored.
//!
//! This backend is selected automatically on illumos and Solaris
//! targets.

use super::Poller;
use crate::event::{EventMask, FiredEvent};

use log::warn;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Event-ports backend.
///
/// This backend owns:
/// - the port file descriptor,
/// - a reusable `port_getn` buffer sized to the loop capacity,
/// - the desired interest per descriptor,
/// - the list of descriptors whose association was consumed by the
///   last poll.
pub(crate) struct EventPortPoller {
    /// Event port file descriptor.
    port: RawFd,

    /// Reusable buffer for `port_getn` output.
    events: Vec<libc::port_event>,

    /// Interest the loop wants per descriptor, indexed by descriptor
    /// value. The kernel-side association may lag it for pending
    /// descriptors.
    interest: Vec<EventMask>,

    /// Descriptors dissociated by event delivery, to re-arm before the
    /// next wait.
    pending: Vec<RawFd>,
}

impl EventPortPoller {
    /// (Re-)associates a descriptor with the poll bits for `mask`.
    fn associate(&self, fd: RawFd, mask: EventMask) -> io::Result<()> {
        let mut events: libc::c_int = 0;

        if mask.contains(EventMask::READABLE) {
            events |= libc::POLLIN as libc::c_int;
        }
        if mask.contains(EventMask::WRITABLE) {
            events |= libc::POLLOUT as libc::c_int;
        }

        let rc = unsafe {
            libc::port_associate(
                self.port,
                libc::PORT_SOURCE_FD,
                fd as libc::uintptr_t,
                events,
                std::ptr::null_mut(),
            )
        };

        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }
}

impl Poller for EventPortPoller {
    fn with_capacity(capacity: usize) -> io::Result<Self> {
        let port = unsafe { libc::port_create() };
        if port < 0 {
            return Err(io::Error::last_os_error());
        }

        unsafe {
            libc::fcntl(port, libc::F_SETFD, libc::FD_CLOEXEC);
        }

        Ok(Self {
            port,
            // port_getn with a zero-length list returns without
            // waiting; one slot keeps timer sleeps honest.
            events: Vec::with_capacity(capacity.max(1)),
            interest: vec![EventMask::empty(); capacity],
            pending: Vec::new(),
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

        // A delivered descriptor is currently dissociated; the poll
        // entry path re-arms it with whatever interest stands then.
        if self.pending.contains(&fd) {
            self.interest[slot] = wanted;
            return Ok(());
        }

        self.associate(fd, wanted)?;
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

        self.interest[slot] = remaining;

        if self.pending.contains(&fd) {
            return;
        }

        if remaining.is_empty() {
            unsafe {
                libc::port_dissociate(self.port, libc::PORT_SOURCE_FD, fd as libc::uintptr_t);
            }
        } else {
            let _ = self.associate(fd, remaining);
        }
    }

    fn poll(
        &mut self,
        fired: &mut Vec<FiredEvent>,
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        // Re-arm everything the previous delivery dissociated. A
        // shrinking resize may have dropped a pending descriptor's
        // slot; such a descriptor has no interest left to restore.
        for &fd in &self.pending {
            let mask = self
                .interest
                .get(fd as usize)
                .copied()
                .unwrap_or(EventMask::empty());
            if !mask.is_empty() {
                if let Err(err) = self.associate(fd, mask) {
                    warn!("failed to re-arm fd {fd} with the event port: {err}");
                }
            }
        }
        self.pending.clear();

        let mut ts;
        let ts_ptr = match timeout {
            Some(t) => {
                ts = libc::timespec {
                    tv_sec: t.as_secs() as libc::time_t,
                    tv_nsec: t.subsec_nanos() as libc::c_long,
                };
                &mut ts as *mut libc::timespec
            }
            None => std::ptr::null_mut(),
        };

        self.events.clear();

        // In-value: wait for at least one event. Out-value: how many
        // were actually retrieved, meaningful even when the call
        // reports ETIME.
        let mut nget: libc::c_uint = 1;

        let rc = unsafe {
            libc::port_getn(
                self.port,
                self.events.as_mut_ptr(),
                self.events.capacity() as libc::c_uint,
                &mut nget,
                ts_ptr,
            )
        };

        if rc < 0 {
            let err = io::Error::last_os_error();
            let timed_out = err.raw_os_error() == Some(libc::ETIME);
            if !timed_out && nget == 0 {
                return Err(err);
            }
        }

        unsafe {
            self.events.set_len(nget as usize);
        }

        let mut appended = 0;
        for i in 0..self.events.len() {
            let ev = self.events[i];
            let bits = ev.portev_events;
            let fd = ev.portev_object as RawFd;

            // Delivery consumed the association whatever the bits say,
            // so the descriptor must be re-armed either way.
            self.pending.push(fd);

            let mut mask = EventMask::empty();
            if bits & libc::POLLIN as libc::c_int != 0 {
                mask |= EventMask::READABLE;
            }
            if bits & libc::POLLOUT as libc::c_int != 0 {
                mask |= EventMask::WRITABLE;
            }
            if bits & (libc::POLLERR | libc::POLLHUP) as libc::c_int != 0 {
                mask |= EventMask::READABLE | EventMask::WRITABLE;
            }

            if mask.is_empty() {
                continue;
            }

            fired.push(FiredEvent { fd, mask });
            appended += 1;
        }

        Ok(appended)
    }

    fn name(&self) -> &'static str {
        "evport"
    }
}

impl Drop for EventPortPoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.port);
        }
    }
}
