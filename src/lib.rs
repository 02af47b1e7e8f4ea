//! # Vigilia
//!
//! **Vigilia** is a single-threaded event loop for Unix, designed as the
//! dedicated readiness and timer dispatch core for **Nebula** server
//! processes.
//!
//! Unlike general-purpose async runtimes, Vigilia exposes no futures and
//! spawns no threads. It is the loop a server process is built around:
//! register callbacks for descriptor readiness and timer deadlines, then
//! hand the thread to [`EventLoop::run`]. Every callback runs on that one
//! thread, in a documented order, with no locking anywhere.
//!
//! Vigilia keeps the surface small while covering what a server needs:
//!
//! - **File events** with per-direction callbacks and an optional
//!   write-before-read barrier for flush-then-refill patterns
//! - **Timers**, one-shot and repeating, re-armed without drift pile-up
//! - **Poll hooks** running just before the wait and between file and
//!   timer dispatch
//! - **Compile-time backend selection** with a uniform semantic contract
//!   across all of them
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use vigilia::{EventLoop, EventMask};
//!
//! let mut el = EventLoop::with_capacity(1024)?;
//!
//! el.register_file(listener_fd, EventMask::READABLE, |el, fd, _ready| {
//!     // accept and register the new connection
//! })?;
//!
//! el.schedule_repeating(Duration::from_secs(1), |el, _id| {
//!     // periodic housekeeping
//! });
//!
//! el.run();
//! ```
//!
//! ## Backends
//!
//! The polling mechanism is chosen at compile time: epoll on Linux,
//! kqueue on macOS and the BSDs, event ports on illumos, and `select(2)`
//! as the portable fallback. [`EventLoop::backend_name`] reports which
//! one is live.
//!
//! ## Getting Started
//!
//! Add Vigilia to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! vigilia = { git = "https://github.com/Nebula-ecosystem/Vigilia" }
//! ```

#[cfg(not(unix))]
compile_error!("vigilia only supports Unix platforms");

mod core;
mod error;
mod event;
mod files;
mod poller;
mod timer;
mod wait;

pub use crate::core::EventLoop;
pub use error::Error;
pub use event::{EventMask, RunFlags};
pub use timer::TimerId;
pub use wait::wait;
