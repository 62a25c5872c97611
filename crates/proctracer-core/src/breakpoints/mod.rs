//! # Breakpoint Tables
//!
//! Software instruction patching ([`software`]) and hardware debug-slot
//! reservation ([`hardware`]).

pub mod hardware;
pub mod software;

pub use hardware::{HardwareBreakpoint, HardwareBreakpointTable};
pub use software::{SoftwareBreakpoint, SoftwareBreakpointTable};
