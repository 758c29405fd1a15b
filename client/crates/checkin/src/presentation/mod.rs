//! Presentation Layer
//!
//! Wire DTOs, user-facing notices and display view models.

pub mod dto;
pub mod notice;
pub mod view;
