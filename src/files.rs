//! Per-descriptor registration table.
//!
//! Registrations are stored in a vector indexed directly by descriptor
//! value, the loop capacity being the vector length. This gives O(1)
//! lookup on the dispatch path and makes the capacity bound explicit:
//! a descriptor numerically beyond the table cannot be registered.
//!
//! The table also maintains the highest-registered-descriptor
//! watermark that capacity-bounded backends and resize validation rely
//! on.

use crate::event::{EventMask, FileCallback};

use std::os::fd::RawFd;
use std::rc::Rc;

/// One descriptor's registration.
///
/// The mask is always the union of the bits that have a live callback,
/// plus possibly `BARRIER`; a registration whose mask empties is
/// removed from the table rather than left behind.
pub(crate) struct FileEntry {
    /// Interest bits this registration stands for.
    pub(crate) mask: EventMask,

    /// Callback for readable readiness.
    pub(crate) read_cb: Option<FileCallback>,

    /// Callback for writable readiness.
    pub(crate) write_cb: Option<FileCallback>,
}

/// Descriptor-indexed registration table.
pub(crate) struct FileTable {
    /// One slot per addressable descriptor; `None` means unregistered.
    entries: Vec<Option<FileEntry>>,

    /// Highest descriptor currently registered.
    maxfd: Option<RawFd>,
}

impl FileTable {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let mut entries = Vec::new();
        entries.resize_with(capacity, || None);

        Self {
            entries,
            maxfd: None,
        }
    }

    /// Number of addressable descriptors (0..capacity).
    pub(crate) fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Highest descriptor with a live registration.
    pub(crate) fn maxfd(&self) -> Option<RawFd> {
        self.maxfd
    }

    /// Installs `callback` for every READABLE/WRITABLE bit in `mask`
    /// and merges `mask` into the registration.
    ///
    /// Interest bits are additive across calls; the callback for a bit
    /// that already had one is replaced. The caller has already bounded
    /// `fd` to the capacity and registered the bits with the backend.
    pub(crate) fn register(&mut self, fd: RawFd, mask: EventMask, callback: FileCallback) {
        let entry = self.entries[fd as usize].get_or_insert_with(|| FileEntry {
            mask: EventMask::empty(),
            read_cb: None,
            write_cb: None,
        });

        entry.mask |= mask;

        if mask.contains(EventMask::READABLE) {
            entry.read_cb = Some(Rc::clone(&callback));
        }
        if mask.contains(EventMask::WRITABLE) {
            entry.write_cb = Some(callback);
        }

        if self.maxfd.is_none_or(|m| fd > m) {
            self.maxfd = Some(fd);
        }
    }

    /// Clears the bits in `mask` and drops their callbacks; removes the
    /// entry entirely once its mask empties, lowering the watermark to
    /// the next registered descriptor below.
    ///
    /// Returns whether a registration was present at all.
    pub(crate) fn unregister(&mut self, fd: RawFd, mask: EventMask) -> bool {
        let slot = fd as usize;

        let emptied = {
            let Some(Some(entry)) = self.entries.get_mut(slot) else {
                return false;
            };

            entry.mask -= mask;

            if mask.contains(EventMask::READABLE) {
                entry.read_cb = None;
            }
            if mask.contains(EventMask::WRITABLE) {
                entry.write_cb = None;
            }

            entry.mask.is_empty()
        };

        if emptied {
            self.entries[slot] = None;

            if self.maxfd == Some(fd) {
                self.maxfd = (0..fd).rev().find(|&f| self.entries[f as usize].is_some());
            }
        }

        true
    }

    pub(crate) fn get(&self, fd: RawFd) -> Option<&FileEntry> {
        self.entries.get(fd as usize).and_then(|slot| slot.as_ref())
    }

    /// Interest bits registered for `fd`, empty when unregistered.
    pub(crate) fn interest(&self, fd: RawFd) -> EventMask {
        self.get(fd).map_or(EventMask::empty(), |entry| entry.mask)
    }

    /// Grows (or shrinks) the addressable range, preserving every
    /// surviving entry. The caller has already checked the watermark
    /// against a shrink.
    pub(crate) fn resize(&mut self, capacity: usize) {
        self.entries.resize_with(capacity, || None);
    }
}
