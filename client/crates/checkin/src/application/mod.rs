//! Application Layer
//!
//! Use cases and controllers built on the domain ports.

pub mod active_sessions;
pub mod capture_flow;
pub mod code_rotation;
pub mod config;
pub mod device_identity;
pub mod session_clock;
pub mod submission;
