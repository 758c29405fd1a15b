//! API DTOs (Data Transfer Objects)
//!
//! Wire shapes of the attendance server and their mapping to domain types.

use chrono::{DateTime, Utc};
use kernel::id::{CourseId, RecordId, SessionId};
use serde::Deserialize;

use crate::domain::entities::{
    CourseRef, DeviceStatus, DisplayedCode, RotatedCode, Session, SubmissionReceipt, Verdict,
};
use crate::domain::value_objects::{GeoPoint, Geofence, Nonce};
use crate::error::{CheckinError, CheckinResult};

/// Timestamps in RFC 3339 or naive ISO-8601 (read as UTC)
mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    use crate::domain::services::parse_timestamp;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse_timestamp(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub mod option {
        use super::*;

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(d)? {
                None => Ok(None),
                Some(raw) => parse_timestamp(&raw)
                    .map(Some)
                    .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {raw}"))),
            }
        }
    }
}

fn course_label(code: Option<&str>, name: Option<&str>) -> Option<String> {
    match (code, name) {
        (Some(code), Some(name)) => Some(format!("{code} - {name}")),
        (Some(label), None) | (None, Some(label)) => Some(label.to_string()),
        (None, None) => None,
    }
}

/// Response for GET /student/device/status
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceStatusResponse {
    #[serde(alias = "bound")]
    pub has_device: bool,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub has_face_enrolled: bool,
}

impl From<DeviceStatusResponse> for DeviceStatus {
    fn from(dto: DeviceStatusResponse) -> Self {
        DeviceStatus {
            bound: dto.has_device,
            active: dto.is_active.unwrap_or(dto.has_device),
            face_enrolled: dto.has_face_enrolled,
        }
    }
}

/// Response for POST /student/device/bind
#[derive(Debug, Clone, Deserialize)]
pub struct BindResponse {
    #[serde(default)]
    pub status: Option<String>,
}

/// Response for POST /student/enroll-face
#[derive(Debug, Clone, Deserialize)]
pub struct EnrollFaceResponse {
    #[serde(default)]
    pub message: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Item of GET /student/sessions/active
#[derive(Debug, Clone, Deserialize)]
pub struct ActiveSessionResponse {
    pub id: SessionId,
    #[serde(default)]
    pub code: String,
    pub course_id: CourseId,
    #[serde(default)]
    pub course_code: Option<String>,
    #[serde(default)]
    pub course_name: Option<String>,
    #[serde(default, deserialize_with = "timestamp::option::deserialize")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::option::deserialize")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub already_marked: bool,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub radius_m: Option<f64>,
}

impl From<ActiveSessionResponse> for Session {
    fn from(dto: ActiveSessionResponse) -> Self {
        let geofence = match (dto.latitude, dto.longitude, dto.radius_m) {
            (Some(lat), Some(lng), Some(radius_m)) => {
                GeoPoint::new(lat, lng).map(|center| Geofence { center, radius_m })
            }
            _ => None,
        };
        Session {
            id: dto.id,
            course: CourseRef {
                id: dto.course_id,
                code: dto.course_code,
                name: dto.course_name,
            },
            join_code: dto.code,
            starts_at: dto.starts_at,
            ends_at: dto.ends_at,
            is_active: dto.is_active,
            geofence,
            already_marked: dto.already_marked,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QrPayloadInfo {
    #[serde(default)]
    pub course_code: Option<String>,
    #[serde(default)]
    pub course_name: Option<String>,
}

/// Response for GET /lecturer/qr/{session_id}/display
#[derive(Debug, Clone, Deserialize)]
pub struct CodeDisplayResponse {
    pub session_id: SessionId,
    #[serde(default)]
    pub session_code: Option<String>,
    pub qr_data: String,
    #[serde(default)]
    pub qr_payload: Option<QrPayloadInfo>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub expires_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "timestamp::option::deserialize")]
    pub session_ends_at: Option<DateTime<Utc>>,
}

impl From<CodeDisplayResponse> for DisplayedCode {
    fn from(dto: CodeDisplayResponse) -> Self {
        let payload = dto.qr_payload.unwrap_or_default();
        DisplayedCode {
            session_id: dto.session_id,
            code_text: dto.qr_data,
            join_code: dto.session_code,
            course_label: course_label(payload.course_code.as_deref(), payload.course_name.as_deref()),
            expires_at: dto.expires_at,
            session_ends_at: dto.session_ends_at,
        }
    }
}

/// Response for POST /lecturer/sessions/{session_id}/qr/rotate
#[derive(Debug, Clone, Deserialize)]
pub struct RotateResponse {
    pub session_id: SessionId,
    pub nonce: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub expires_at: DateTime<Utc>,
    #[serde(default, alias = "qr_data")]
    pub code_text: Option<String>,
}

impl TryFrom<RotateResponse> for RotatedCode {
    type Error = CheckinError;

    fn try_from(dto: RotateResponse) -> CheckinResult<Self> {
        let nonce = Nonce::new(&dto.nonce)
            .ok_or_else(|| CheckinError::Internal("Rotation returned an empty nonce".to_string()))?;
        Ok(RotatedCode {
            session_id: dto.session_id,
            nonce,
            code_text: dto.code_text.filter(|t| !t.trim().is_empty()),
            expires_at: dto.expires_at,
        })
    }
}

/// Response for POST /student/attendance
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub record_id: Option<RecordId>,
    #[serde(alias = "status")]
    pub verdict: String,
    #[serde(default)]
    pub within_geofence: Option<bool>,
    #[serde(default)]
    pub distance_m: Option<f64>,
}

impl From<SubmitResponse> for SubmissionReceipt {
    fn from(dto: SubmitResponse) -> Self {
        let verdict = match dto.verdict.to_ascii_lowercase().as_str() {
            "accepted" | "confirmed" => Verdict::Accepted,
            "flagged" => Verdict::Flagged,
            other => {
                tracing::warn!(verdict = %other, "Unknown verdict, treating as flagged");
                Verdict::Flagged
            }
        };
        SubmissionReceipt {
            record_id: dto.record_id,
            verdict,
            within_geofence: dto.within_geofence,
            distance_m: dto.distance_m,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetailItem {
    pub msg: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Detail {
    Text(String),
    Items(Vec<DetailItem>),
}

/// Error body: `{"detail": "..."}` or `{"detail": [{"msg": "..."}]}`
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub detail: Detail,
}

impl ErrorBody {
    pub fn message(&self) -> Option<String> {
        let text = match &self.detail {
            Detail::Text(text) => text.clone(),
            Detail::Items(items) => items
                .iter()
                .map(|i| i.msg.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        };
        (!text.trim().is_empty()).then_some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_device_status_defaults_active_to_bound() {
        let dto: DeviceStatusResponse =
            serde_json::from_str(r#"{"has_device":true,"has_face_enrolled":false}"#).unwrap();
        let status = DeviceStatus::from(dto);
        assert!(status.bound && status.active && !status.face_enrolled);

        let dto: DeviceStatusResponse =
            serde_json::from_str(r#"{"bound":true,"is_active":false,"has_face_enrolled":true}"#)
                .unwrap();
        let status = DeviceStatus::from(dto);
        assert!(status.bound && !status.active && status.face_enrolled);
    }

    #[test]
    fn test_active_session_with_naive_timestamps() {
        let dto: ActiveSessionResponse = serde_json::from_str(
            r#"{"id":42,"code":"K7Q2","course_id":3,"course_code":"CS101",
                "ends_at":"2026-03-02T10:30:00","already_marked":true}"#,
        )
        .unwrap();
        let session = Session::from(dto);
        assert_eq!(session.id, SessionId::new(42));
        assert_eq!(
            session.ends_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 2, 10, 30, 0).unwrap())
        );
        assert!(session.is_active);
        assert!(session.already_marked);
        assert!(session.geofence.is_none());
    }

    #[test]
    fn test_code_display_maps_course_label() {
        let dto: CodeDisplayResponse = serde_json::from_str(
            r#"{"session_id":42,"session_code":"K7Q2","qr_data":"ABSENSE:42:abc",
                "qr_payload":{"course_code":"CS101","course_name":"Operating Systems"},
                "expires_at":"2026-03-02T09:00:30Z","session_ends_at":null,
                "time_remaining_seconds":30}"#,
        )
        .unwrap();
        let code = DisplayedCode::from(dto);
        assert_eq!(code.code_text, "ABSENSE:42:abc");
        assert_eq!(code.course_label.as_deref(), Some("CS101 - Operating Systems"));
        assert_eq!(code.session_ends_at, None);
    }

    #[test]
    fn test_rotate_response_requires_nonce() {
        let dto: RotateResponse = serde_json::from_str(
            r#"{"session_id":42,"nonce":" ","expires_at":"2026-03-02T09:01:00"}"#,
        )
        .unwrap();
        assert!(RotatedCode::try_from(dto).is_err());
    }

    #[test]
    fn test_submit_response_status_alias() {
        let dto: SubmitResponse =
            serde_json::from_str(r#"{"record_id":7,"status":"confirmed"}"#).unwrap();
        let receipt = SubmissionReceipt::from(dto);
        assert_eq!(receipt.verdict, Verdict::Accepted);
        assert_eq!(receipt.record_id, Some(RecordId::new(7)));

        let dto: SubmitResponse = serde_json::from_str(
            r#"{"verdict":"flagged","within_geofence":false,"distance_m":250.4}"#,
        )
        .unwrap();
        let receipt = SubmissionReceipt::from(dto);
        assert_eq!(receipt.verdict, Verdict::Flagged);
        assert!(receipt.is_outside_geofence());
    }

    #[test]
    fn test_error_body_shapes() {
        let body: ErrorBody = serde_json::from_str(r#"{"detail":"Session inactive"}"#).unwrap();
        assert_eq!(body.message().as_deref(), Some("Session inactive"));

        let body: ErrorBody = serde_json::from_str(
            r#"{"detail":[{"msg":"field required","loc":["body","selfie"]},{"msg":"bad latitude"}]}"#,
        )
        .unwrap();
        assert_eq!(body.message().as_deref(), Some("field required; bad latitude"));
    }

    #[test]
    fn test_bad_timestamp_is_rejected() {
        let result = serde_json::from_str::<RotateResponse>(
            r#"{"session_id":42,"nonce":"abc","expires_at":"later"}"#,
        );
        assert!(result.is_err());
    }
}
