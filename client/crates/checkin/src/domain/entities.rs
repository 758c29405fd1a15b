//! Domain Entities
//!
//! Core business entities for the check-in domain.

use chrono::{DateTime, Duration, Utc};
use kernel::id::{CourseId, RecordId, SessionId};

use crate::domain::value_objects::{DeviceId, FlowId, GeoPoint, Geofence, ImageArtifact, Nonce};

/// Course reference carried by a session
#[derive(Debug, Clone, PartialEq)]
pub struct CourseRef {
    pub id: CourseId,
    pub code: Option<String>,
    pub name: Option<String>,
}

impl CourseRef {
    /// Human readable label, e.g. `CS101 - Operating Systems`
    pub fn label(&self) -> String {
        match (self.code.as_deref(), self.name.as_deref()) {
            (Some(code), Some(name)) => format!("{code} - {name}"),
            (Some(label), None) | (None, Some(label)) => label.to_string(),
            (None, None) => format!("Course {}", self.id),
        }
    }
}

/// Attendance session entity
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub course: CourseRef,
    /// Human readable join code
    pub join_code: String,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub geofence: Option<Geofence>,
    /// Participant already has a record for this session
    pub already_marked: bool,
}

impl Session {
    /// Active and not past its end time
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.ends_at.is_none_or(|ends_at| now < ends_at)
    }
}

/// Result of decoding a scanned code
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCode {
    pub session_id: SessionId,
    pub nonce: Nonce,
    /// Only present when the payload carries its own expiry
    pub expires_at: Option<DateTime<Utc>>,
}

/// A rotating code locked into a participant flow
#[derive(Debug, Clone, PartialEq)]
pub struct RotatingCode {
    pub session_id: SessionId,
    pub nonce: Nonce,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

impl RotatingCode {
    /// Lock a decoded code at scan time
    ///
    /// Without an expiry in the payload the code lives `fallback_ttl`
    /// from the scan.
    pub fn lock(decoded: DecodedCode, scanned_at: DateTime<Utc>, fallback_ttl: Duration) -> Self {
        Self {
            session_id: decoded.session_id,
            nonce: decoded.nonce,
            issued_at: scanned_at,
            expires_at: decoded.expires_at.unwrap_or(scanned_at + fallback_ttl),
            consumed: false,
        }
    }

    /// Valid only while `now` is in `[issued_at, expires_at)`, the session is
    /// active and the code was never consumed
    pub fn is_valid_at(&self, now: DateTime<Utc>, session_active: bool) -> bool {
        session_active && !self.consumed && self.issued_at <= now && now < self.expires_at
    }

    pub fn consume(&mut self) {
        self.consumed = true;
    }
}

/// The code currently shown on the instructor display
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayedCode {
    pub session_id: SessionId,
    /// Exact text encoded into the scannable image
    pub code_text: String,
    pub join_code: Option<String>,
    pub course_label: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub session_ends_at: Option<DateTime<Utc>>,
}

/// A freshly minted code returned by a manual rotation
#[derive(Debug, Clone, PartialEq)]
pub struct RotatedCode {
    pub session_id: SessionId,
    pub nonce: Nonce,
    pub code_text: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Server-side device binding state for the signed-in account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceStatus {
    pub bound: bool,
    /// `false` while a new binding awaits approval
    pub active: bool,
    pub face_enrolled: bool,
}

/// Reference face state for the account
#[derive(Debug, Clone, Default)]
pub struct FaceEnrollmentState {
    pub enrolled: bool,
    /// Captured locally, not yet uploaded
    pub pending: Option<ImageArtifact>,
}

/// Per-flow record of captured proofs
#[derive(Debug, Clone)]
pub struct CaptureProgress {
    pub flow_id: FlowId,
    pub code: Option<RotatingCode>,
    pub selfie: Option<ImageArtifact>,
    pub location: Option<GeoPoint>,
}

impl CaptureProgress {
    pub fn new() -> Self {
        Self {
            flow_id: FlowId::generate(),
            code: None,
            selfie: None,
            location: None,
        }
    }

    pub fn code_scanned(&self) -> bool {
        self.code.is_some()
    }

    pub fn selfie_captured(&self) -> bool {
        self.selfie.as_ref().is_some_and(|s| !s.is_empty())
    }

    pub fn location_captured(&self) -> bool {
        self.location.is_some()
    }
}

impl Default for CaptureProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything sent in one check-in request
#[derive(Debug, Clone)]
pub struct Submission {
    pub session_id: SessionId,
    pub nonce: Nonce,
    pub device_id: DeviceId,
    pub location: GeoPoint,
    pub selfie: ImageArtifact,
}

/// Server decision for a recorded check-in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    /// Recorded, but marked for review
    Flagged,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Accepted => "accepted",
            Verdict::Flagged => "flagged",
        }
    }
}

/// Parsed server answer to a submission
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionReceipt {
    pub record_id: Option<RecordId>,
    pub verdict: Verdict,
    pub within_geofence: Option<bool>,
    pub distance_m: Option<f64>,
}

impl SubmissionReceipt {
    /// Explicit `within_geofence: false`, or a flagged verdict that only
    /// reports a distance
    pub fn is_outside_geofence(&self) -> bool {
        match self.within_geofence {
            Some(within) => !within,
            None => self.verdict == Verdict::Flagged && self.distance_m.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn code(expires_in: i64) -> RotatingCode {
        RotatingCode {
            session_id: SessionId::new(42),
            nonce: Nonce::new("abc123").unwrap(),
            issued_at: t0(),
            expires_at: t0() + Duration::seconds(expires_in),
            consumed: false,
        }
    }

    #[test]
    fn test_code_valid_window_is_half_open() {
        let code = code(30);
        assert!(code.is_valid_at(t0(), true));
        assert!(code.is_valid_at(t0() + Duration::seconds(29), true));
        assert!(!code.is_valid_at(t0() + Duration::seconds(30), true));
        assert!(!code.is_valid_at(t0() - Duration::seconds(1), true));
    }

    #[test]
    fn test_code_invalid_when_session_inactive_or_consumed() {
        let mut code = code(30);
        assert!(!code.is_valid_at(t0(), false));
        code.consume();
        assert!(!code.is_valid_at(t0(), true));
    }

    #[test]
    fn test_lock_uses_fallback_ttl_without_payload_expiry() {
        let decoded = DecodedCode {
            session_id: SessionId::new(42),
            nonce: Nonce::new("abc123").unwrap(),
            expires_at: None,
        };
        let locked = RotatingCode::lock(decoded.clone(), t0(), Duration::seconds(30));
        assert_eq!(locked.expires_at, t0() + Duration::seconds(30));

        let bounded = DecodedCode {
            expires_at: Some(t0() + Duration::seconds(5)),
            ..decoded
        };
        let locked = RotatingCode::lock(bounded, t0(), Duration::seconds(30));
        assert_eq!(locked.expires_at, t0() + Duration::seconds(5));
    }

    #[test]
    fn test_session_open_until_end() {
        let session = Session {
            id: SessionId::new(42),
            course: CourseRef {
                id: CourseId::new(3),
                code: Some("CS101".into()),
                name: None,
            },
            join_code: "K7Q2".into(),
            starts_at: None,
            ends_at: Some(t0()),
            is_active: true,
            geofence: None,
            already_marked: false,
        };
        assert!(session.is_open_at(t0() - Duration::seconds(1)));
        assert!(!session.is_open_at(t0()));
        assert_eq!(session.course.label(), "CS101");
    }

    #[test]
    fn test_course_label_fallbacks() {
        let course = CourseRef {
            id: CourseId::new(3),
            code: Some("CS101".into()),
            name: Some("Operating Systems".into()),
        };
        assert_eq!(course.label(), "CS101 - Operating Systems");
        let bare = CourseRef {
            id: CourseId::new(3),
            code: None,
            name: None,
        };
        assert_eq!(bare.label(), "Course 3");
    }
}
