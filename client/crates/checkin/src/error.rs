//! Check-in Error Types
//!
//! Check-in specific error variants that integrate with the unified
//! `kernel::error::AppError` system.

use kernel::error::{app_error::AppError, kind::ErrorKind};
use kernel::id::SessionId;
use thiserror::Error;

use crate::domain::flow::FlowStep;

/// Check-in result type alias
pub type CheckinResult<T> = Result<T, CheckinError>;

/// Server `detail` fragments that announce a closed session
const SESSION_CLOSED_MARKERS: &[&str] = &[
    "session has ended",
    "session ended",
    "session inactive",
    "inactive session",
    "session is not active",
];

#[derive(Debug, Error)]
pub enum CheckinError {
    /// The session end time passed on the local clock
    #[error("Session has ended")]
    SessionExpired,

    /// The server reported the session as ended or inactive
    #[error("{0}")]
    SessionClosed(String),

    #[error("Invalid QR payload")]
    InvalidPayload,

    #[error("QR belongs to another session")]
    WrongSession {
        expected: SessionId,
        found: SessionId,
    },

    /// A code is already locked into this flow instance
    #[error("A code was already scanned for this check-in; restart to scan another")]
    CodeAlreadyLocked,

    #[error("The scanned code has expired; scan the current code")]
    CodeExpired,

    #[error("Device id missing")]
    DeviceIdMissing,

    #[error("Device registration failed: {0}")]
    DeviceBindFailed(String),

    #[error("Face not enrolled")]
    FaceNotEnrolled,

    #[error("Capture a reference photo first")]
    ReferenceImageMissing,

    #[error("Complete the previous step first (current step: {0})")]
    StepNotReached(FlowStep),

    #[error("{0} already captured; retake to replace it")]
    AlreadyCaptured(&'static str),

    #[error("Missing {0}")]
    MissingProof(&'static str),

    #[error("Submission already in progress")]
    SubmissionInFlight,

    #[error("Attendance already submitted for this check-in")]
    AlreadySubmitted,

    #[error("Location unavailable: {0}")]
    LocationUnavailable(String),

    /// The flow instance was discarded while an operation was pending
    #[error("This check-in was closed")]
    FlowClosed,

    /// Server rejected the request; `detail` is shown verbatim
    #[error("{detail}")]
    Server { status: u16, detail: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CheckinError {
    /// Classify a non-success server answer
    ///
    /// A detail announcing an ended or inactive session becomes
    /// [`CheckinError::SessionClosed`]; anything else is kept verbatim.
    pub fn from_server(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let lowered = detail.to_ascii_lowercase();
        if SESSION_CLOSED_MARKERS.iter().any(|m| lowered.contains(m)) {
            CheckinError::SessionClosed(detail)
        } else {
            CheckinError::Server { status, detail }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CheckinError::SessionExpired
            | CheckinError::SessionClosed(_)
            | CheckinError::CodeExpired
            | CheckinError::FlowClosed => ErrorKind::Gone,
            CheckinError::InvalidPayload
            | CheckinError::WrongSession { .. }
            | CheckinError::ReferenceImageMissing => ErrorKind::BadRequest,
            CheckinError::CodeAlreadyLocked
            | CheckinError::StepNotReached(_)
            | CheckinError::AlreadyCaptured(_)
            | CheckinError::SubmissionInFlight
            | CheckinError::AlreadySubmitted => ErrorKind::Conflict,
            CheckinError::DeviceBindFailed(_) | CheckinError::FaceNotEnrolled => {
                ErrorKind::Forbidden
            }
            CheckinError::MissingProof(_) => ErrorKind::UnprocessableEntity,
            CheckinError::LocationUnavailable(_) => ErrorKind::RequestTimeout,
            CheckinError::Server { status, .. } => ErrorKind::from_status(*status),
            CheckinError::Network(e) if e.is_timeout() => ErrorKind::RequestTimeout,
            CheckinError::Network(_) => ErrorKind::ServiceUnavailable,
            CheckinError::DeviceIdMissing | CheckinError::Internal(_) => {
                ErrorKind::InternalServerError
            }
        }
    }

    /// Whether the participant can fix this without leaving the flow
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            CheckinError::SessionExpired
                | CheckinError::SessionClosed(_)
                | CheckinError::FlowClosed
                | CheckinError::AlreadySubmitted
        )
    }

    /// Whether the same request can succeed when sent again later
    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }

    /// Whether this error ends every flow bound to the session
    pub fn is_session_terminal(&self) -> bool {
        matches!(
            self,
            CheckinError::SessionExpired | CheckinError::SessionClosed(_)
        )
    }

    /// Log the error with appropriate level
    pub(crate) fn log(&self) {
        match self {
            CheckinError::Network(e) => {
                tracing::error!(error = %e, "Check-in network error");
            }
            CheckinError::Internal(msg) => {
                tracing::error!(message = %msg, "Check-in internal error");
            }
            CheckinError::Server { status, detail } => {
                tracing::warn!(status, detail = %detail, "Server rejected request");
            }
            CheckinError::DeviceBindFailed(reason) => {
                tracing::warn!(reason = %reason, "Device bind failed");
            }
            CheckinError::WrongSession { expected, found } => {
                tracing::warn!(expected = %expected, found = %found, "Code from another session");
            }
            CheckinError::SessionExpired | CheckinError::SessionClosed(_) => {
                tracing::info!(error = %self, "Session closed");
            }
            _ => {
                tracing::debug!(error = %self, "Check-in error");
            }
        }
    }
}

impl From<CheckinError> for AppError {
    fn from(err: CheckinError) -> Self {
        err.log();
        let kind = err.kind();
        let message = err.to_string();
        let app = AppError::new(kind, message);
        match err {
            CheckinError::SessionExpired | CheckinError::SessionClosed(_) => {
                app.with_action("Ask the instructor for an active session")
            }
            CheckinError::InvalidPayload | CheckinError::WrongSession { .. } => {
                app.with_action("Scan the code shown for your session")
            }
            CheckinError::FaceNotEnrolled | CheckinError::ReferenceImageMissing => {
                app.with_action("Enroll a reference photo first")
            }
            CheckinError::Network(e) => app.with_source(e),
            _ => app,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_server_detects_closed_session() {
        for detail in ["Session has ended", "Session inactive", "Invalid or inactive session"] {
            let err = CheckinError::from_server(400, detail);
            assert!(matches!(err, CheckinError::SessionClosed(ref d) if d == detail));
            assert!(err.is_session_terminal());
            assert_eq!(err.to_string(), detail);
        }
    }

    #[test]
    fn test_from_server_keeps_other_details_verbatim() {
        let err = CheckinError::from_server(400, "Invalid or expired QR nonce");
        assert!(!err.is_session_terminal());
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "Invalid or expired QR nonce");
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_messages_match_user_facing_text() {
        assert_eq!(CheckinError::InvalidPayload.to_string(), "Invalid QR payload");
        let err = CheckinError::WrongSession {
            expected: SessionId::new(7),
            found: SessionId::new(42),
        };
        assert_eq!(err.to_string(), "QR belongs to another session");
    }

    #[test]
    fn test_recoverability() {
        assert!(CheckinError::InvalidPayload.is_recoverable());
        assert!(CheckinError::DeviceBindFailed("x".into()).is_recoverable());
        assert!(!CheckinError::SessionExpired.is_recoverable());
        assert!(!CheckinError::AlreadySubmitted.is_recoverable());
    }

    #[test]
    fn test_transient_follows_kind() {
        assert!(CheckinError::from_server(503, "Service unavailable").is_transient());
        assert!(CheckinError::LocationUnavailable("timeout".into()).is_transient());
        assert!(!CheckinError::from_server(400, "Invalid or expired QR nonce").is_transient());
        assert!(!CheckinError::SessionExpired.is_transient());
    }

    #[test]
    fn test_into_app_error() {
        let app: AppError = CheckinError::SessionExpired.into();
        assert_eq!(app.kind(), ErrorKind::Gone);
        assert!(app.action().is_some());

        let app: AppError = CheckinError::MissingProof("selfie").into();
        assert_eq!(app.status_code(), 422);
        assert_eq!(app.message(), "Missing selfie");
    }
}
