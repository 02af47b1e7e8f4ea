use std::io;
use std::os::fd::RawFd;

/// Errors reported by the fallible half of the loop API.
///
/// Only construction, registration, and resize can fail. Removal paths
/// (`unregister_file`, `cancel_timer`) are best-effort and report
/// nothing, and a poll cycle never surfaces per-event errors once it
/// has begun.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backend could not obtain its kernel resource at construction.
    #[error("event loop creation failed: {source}")]
    Create {
        #[source]
        source: io::Error,
    },

    /// The descriptor does not fit the loop's current capacity.
    #[error("descriptor {fd} is outside the loop capacity of {capacity}")]
    OutOfRange { fd: RawFd, capacity: usize },

    /// The backend rejected an interest registration.
    #[error("interest registration failed for descriptor {fd}: {source}")]
    Register {
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    /// A resize was requested below a still-registered descriptor.
    #[error("cannot resize to {requested}: descriptor {highest} is still registered")]
    ResizeBelowWatermark { requested: usize, highest: RawFd },

    /// The backend could not grow (or rebuild) its buffers.
    #[error("backend resize failed: {source}")]
    Resize {
        #[source]
        source: io::Error,
    },
}
