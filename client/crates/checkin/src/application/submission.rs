//! Submission Coordinator
//!
//! Sends one check-in and turns the server verdict into a notice.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use kernel::error::kind::ErrorKind;

use crate::domain::entities::{Submission, SubmissionReceipt, Verdict};
use crate::domain::repository::AttendanceRepository;
use crate::error::{CheckinError, CheckinResult};
use crate::presentation::notice::Notice;

/// Output of a recorded submission
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub receipt: SubmissionReceipt,
    /// Success, or a non-fatal warning for flagged check-ins
    pub notice: Notice,
}

pub struct SubmissionCoordinator<A>
where
    A: AttendanceRepository,
{
    attendance_repo: Arc<A>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag even if the submitting future is dropped
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<A> SubmissionCoordinator<A>
where
    A: AttendanceRepository + Sync,
{
    pub fn new(attendance_repo: Arc<A>) -> Self {
        Self {
            attendance_repo,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_submitting(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Submit once
    ///
    /// A call made while another is pending is rejected with
    /// `SubmissionInFlight` without reaching the server.
    pub async fn submit(&self, submission: &Submission) -> CheckinResult<SubmissionOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(session_id = %submission.session_id, "Submission already in flight");
            return Err(CheckinError::SubmissionInFlight);
        }
        let _guard = InFlightGuard(&self.in_flight);

        tracing::info!(
            session_id = %submission.session_id,
            device = %submission.device_id.fingerprint(),
            selfie_bytes = submission.selfie.len(),
            "Submitting attendance"
        );

        let receipt = self
            .attendance_repo
            .submit(submission)
            .await
            .map_err(submit_rejection)?;

        tracing::info!(
            session_id = %submission.session_id,
            verdict = receipt.verdict.as_str(),
            within_geofence = ?receipt.within_geofence,
            distance_m = ?receipt.distance_m,
            "Attendance recorded"
        );

        Ok(interpret(receipt))
    }
}

/// A session the server refuses at submit time fails this submission only
///
/// Session end is driven by the local clock and the code display; here the
/// detail is kept verbatim so the participant can retry with the same proofs.
fn submit_rejection(err: CheckinError) -> CheckinError {
    match err {
        CheckinError::SessionClosed(detail) => CheckinError::Server {
            status: ErrorKind::Gone.status_code(),
            detail,
        },
        other => other,
    }
}

/// Map a receipt to what the participant sees
///
/// Outside-geofence and flagged verdicts are warnings: the check-in counts.
pub fn interpret(receipt: SubmissionReceipt) -> SubmissionOutcome {
    let notice = if receipt.is_outside_geofence() {
        let distance = receipt
            .distance_m
            .filter(|d| d.is_finite())
            .map(|d| format!(" ({} m away)", d.round() as i64))
            .unwrap_or_default();
        Notice::warning(
            "Attendance recorded",
            format!(
                "You were outside the class location{distance}. \
                 Your attendance may be flagged for review."
            ),
        )
    } else if receipt.verdict == Verdict::Flagged {
        Notice::warning(
            "Attendance recorded",
            "Your attendance was flagged for review.",
        )
    } else {
        Notice::success("Attendance recorded", "Attendance marked successfully.")
    };

    SubmissionOutcome { receipt, notice }
}
