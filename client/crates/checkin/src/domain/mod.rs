//! Domain Layer - Business logic and entities
//!
//! This layer contains:
//! - Domain entities (Session, RotatingCode, CaptureProgress, Submission)
//! - Domain value objects (Nonce, DeviceId, GeoPoint, ImageArtifact)
//! - The capture flow step table
//! - Domain services (code payload codec)
//! - Repository traits (interfaces)

pub mod entities;
pub mod flow;
pub mod repository;
pub mod services;
pub mod value_objects;
