//! # proctracer-utils
//!
//! Shared logging infrastructure for the proctracer workspace, built on
//! `tracing`.

pub mod logging;

pub use logging::{LogFormat, LogLevel, init_logging, init_logging_with_level};
pub use tracing::{debug, error, info, trace, warn};
