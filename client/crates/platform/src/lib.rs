//! Platform Crate - Technical Infrastructure
//!
//! This crate provides shared technical foundations for the client:
//! - Randomness, hashing and device identifier generation
//! - Local key/value persistence (file-backed and in-memory)
//! - Wall-clock and periodic scheduling abstractions, with manual
//!   implementations that tests drive deterministically

pub mod crypto;
pub mod storage;
pub mod time;
