//! Scheduled callback queue.
//!
//! Entries live in a plain vector in creation order, which is also id
//! order since ids are handed out monotonically. The queue is scanned
//! each cycle: once to find the minimum live deadline (which becomes
//! the poll timeout) and once to fire whatever has elapsed. With the
//! handful of timers a loop typically carries, the scans beat the
//! bookkeeping cost of a heap, and the stable order gives equal
//! deadlines a deterministic winner (the older id).
//!
//! Cancellation tombstones an entry instead of removing it, so a scan
//! that is underway never sees its indices shift; tombstones are
//! purged at the start of the next fire pass.

use crate::event::TimerCallback;

use std::time::{Duration, Instant};

/// Handle to a scheduled timer.
///
/// Ids are unique for the lifetime of the loop and never reused, so a
/// stale handle cancels nothing rather than cancelling a stranger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub(crate) u64);

/// One scheduled callback.
pub(crate) struct TimerEntry {
    /// Identity and tie-break: of two entries due in the same pass,
    /// the lower id fires first.
    pub(crate) id: TimerId,

    /// The time at which the entry should fire.
    pub(crate) deadline: Instant,

    /// Re-arm period for repeating entries, `None` for one-shot.
    pub(crate) interval: Option<Duration>,

    /// Callback to invoke when the deadline is reached.
    pub(crate) callback: TimerCallback,

    /// Tombstone: logically deleted, awaiting the next purge.
    pub(crate) dead: bool,
}

/// The loop's collection of scheduled callbacks.
pub(crate) struct TimerQueue {
    /// Entries in creation (= id) order. Append-only between purges.
    pub(crate) entries: Vec<TimerEntry>,

    /// Next id to hand out.
    next_id: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// Adds an entry firing once after `delay`, or every `interval`
    /// when one is given (the first firing then waits one interval).
    pub(crate) fn schedule(
        &mut self,
        delay: Duration,
        interval: Option<Duration>,
        callback: TimerCallback,
    ) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        self.entries.push(TimerEntry {
            id,
            deadline: Instant::now() + delay,
            interval,
            callback,
            dead: false,
        });

        id
    }

    /// Tombstones the entry with the given id, if it is still live.
    pub(crate) fn cancel(&mut self, id: TimerId) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id && !e.dead) {
            entry.dead = true;
        }
    }

    /// Minimum live deadline, the basis of the poll timeout.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .iter()
            .filter(|e| !e.dead)
            .map(|e| e.deadline)
            .min()
    }

    /// Ids at or above this value were created after the current fire
    /// pass began and wait for the next one.
    pub(crate) fn fence(&self) -> u64 {
        self.next_id
    }

    /// Drops tombstoned entries. Only called between fire passes.
    pub(crate) fn purge(&mut self) {
        self.entries.retain(|e| !e.dead);
    }
}
