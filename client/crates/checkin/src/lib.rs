//! Check-in Client Module
//!
//! Clean Architecture structure:
//! - `domain/` - Entities, value objects, the code payload codec, port traits
//! - `application/` - Use cases (device identity, session clock, code rotation,
//!   capture flow, submission, active sessions)
//! - `infra/` - HTTP gateway to the attendance server, location sources
//! - `presentation/` - Wire DTOs, user-facing notices, display view models
//!
//! ## Protocol Model
//! - The instructor display shows a short-lived code and keeps it fresh
//! - A participant flow is step-gated: device bind, face gate, scan, selfie,
//!   location, submit
//! - A scanned code is locked to one flow instance and re-validated at submit
//! - Each flow instance sends at most one successful submission
//! - Session end force-closes both roles

pub mod application;
pub mod domain;
pub mod error;
pub mod infra;
pub mod presentation;

// Re-exports for convenience
pub use application::config::CheckinConfig;
pub use error::{CheckinError, CheckinResult};
pub use infra::http::HttpCheckinApi;

// Re-export kernel error types for unified error handling
pub use kernel::error::{
    app_error::{AppError, AppResult},
    kind::ErrorKind,
};

pub mod models {
    pub use crate::domain::entities::*;
    pub use crate::domain::value_objects::*;
}
