//! # proctracer-core
//!
//! Low-level `ptrace`-based process control and breakpoint primitives for
//! Linux, x86-64 and AArch64.
//!
//! This crate provides:
//! - Attach/detach and thread lifecycle management (the [`controller`] module)
//! - Software breakpoint patching and hardware breakpoint/watchpoint
//!   allocation (the [`breakpoints`] module)
//! - Register inspection and manipulation, per architecture (the [`arch`] module)
//! - Typed wrappers over `ptrace(2)` and its sibling syscalls (the [`kernel`] module)
//!
//! ## Platform support
//!
//! Linux only. The architecture adapter is selected at compile time
//! (`target_arch`), but nothing above the [`arch`] module branches on it;
//! see [`arch::ArchAdapter`].
//!
//! ## Why unsafe code is needed
//!
//! This crate requires `unsafe` code because it calls `ptrace(2)` directly
//! and transmutes fixed-layout kernel structures (register sets, debug-
//! register state) into and out of raw buffers. We wrap these calls in safe
//! abstractions at the module boundary, but the underlying syscalls
//! themselves must be `unsafe`.

#![allow(unsafe_code)]
#![warn(missing_docs)]

pub mod arch;
pub mod breakpoints;
pub mod controller;
pub mod error;
pub mod kernel;
pub mod registry;
pub mod state;
pub mod types;

pub use controller::ExecutionController;
pub use error::{TracerError, TracerResult};
pub use state::GlobalState;
