//! Repository Traits
//!
//! Ports to the attendance server and to device capabilities.
//! Implementations live in the infrastructure layer.

use std::time::Duration;

use kernel::id::SessionId;

use crate::domain::entities::{
    DeviceStatus, DisplayedCode, RotatedCode, Session, Submission, SubmissionReceipt,
};
use crate::domain::value_objects::{DeviceId, GeoPoint, ImageArtifact};
use crate::error::CheckinResult;

/// Device binding and face enrollment for the signed-in account
#[trait_variant::make(DeviceRepository: Send)]
pub trait LocalDeviceRepository {
    async fn status(&self) -> CheckinResult<DeviceStatus>;

    async fn bind(&self, device_id: &DeviceId) -> CheckinResult<()>;

    /// Upload the reference face
    async fn enroll_face(&self, image: &ImageArtifact) -> CheckinResult<()>;
}

/// Session listing and instructor code display
#[trait_variant::make(SessionRepository: Send)]
pub trait LocalSessionRepository {
    /// Sessions the participant can currently check into
    async fn active_sessions(&self) -> CheckinResult<Vec<Session>>;

    /// The code currently valid for a session
    async fn display_code(&self, session_id: SessionId) -> CheckinResult<DisplayedCode>;

    /// Mint a new code now, superseding the current one
    async fn rotate_code(&self, session_id: SessionId, ttl: Duration)
    -> CheckinResult<RotatedCode>;
}

/// Check-in submission
#[trait_variant::make(AttendanceRepository: Send)]
pub trait LocalAttendanceRepository {
    async fn submit(&self, submission: &Submission) -> CheckinResult<SubmissionReceipt>;
}

/// Stable per-installation identifier
#[trait_variant::make(IdentityProvider: Send)]
pub trait LocalIdentityProvider {
    /// Returns the persisted identifier, creating it on first use.
    /// Returns an empty string when persistence fails.
    async fn get_or_create(&self) -> String;
}

/// Device position source
#[trait_variant::make(Locator: Send)]
pub trait LocalLocator {
    async fn current_position(&self) -> CheckinResult<GeoPoint>;
}
