//! Shared Kernel - Cross-crate minimal core
//!
//! This crate contains the "smallest core" of vocabulary shared by every
//! client crate:
//! - Common error types and result aliases
//! - Typed identifiers for server-assigned records
//!
//! **Design Principle**: Only include things that are "hard to change"
//! and mean the same thing for both the instructor and participant roles.

pub mod error {
    pub mod app_error;
    pub mod conversions;
    pub mod kind;
}
pub mod id;
