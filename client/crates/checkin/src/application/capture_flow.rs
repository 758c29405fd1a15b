//! Capture Flow Controller (participant check-in)
//!
//! Drives one check-in through `DeviceBind -> FaceGate -> ScanCode ->
//! CaptureSelfie -> CaptureLocation -> Submit`. Every step change goes
//! through [`FlowStep::can_transition_to`]; submit re-checks every proof
//! against the clock at the moment it is sent.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use kernel::id::SessionId;
use platform::time::{Clock, Scheduler};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::application::config::CheckinConfig;
use crate::application::session_clock::{ClockEvent, SessionClock};
use crate::application::submission::{SubmissionCoordinator, SubmissionOutcome};
use crate::domain::entities::{
    CaptureProgress, DeviceStatus, FaceEnrollmentState, RotatingCode, Submission,
};
use crate::domain::flow::{AbortReason, FlowStep};
use crate::domain::repository::{AttendanceRepository, DeviceRepository, IdentityProvider, Locator};
use crate::domain::services::CodePayloadCodec;
use crate::domain::value_objects::{DeviceId, FlowId, GeoPoint, ImageArtifact};
use crate::error::{CheckinError, CheckinResult};
use crate::presentation::notice::Notice;

const SESSION_ENDED: &str = "Session has ended";

/// Server and device ports a flow talks to
pub struct FlowPorts<D, A, I, L> {
    pub devices: Arc<D>,
    pub attendance: Arc<A>,
    pub identity: Arc<I>,
    pub locator: Arc<L>,
}

/// What the participant screen renders
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSnapshot {
    pub session_id: SessionId,
    pub step: FlowStep,
    pub flow_id: Option<FlowId>,
    pub device: DeviceStatus,
    pub face_enrolled: bool,
    pub reference_pending: bool,
    pub code_locked: bool,
    pub selfie_captured: bool,
    pub location: Option<GeoPoint>,
    pub can_submit: bool,
    pub submitting: bool,
    pub abort_reason: Option<AbortReason>,
}

#[derive(Debug)]
struct FlowState {
    step: FlowStep,
    device_id: Option<DeviceId>,
    device: DeviceStatus,
    face: FaceEnrollmentState,
    /// `None` once the instance is finished or discarded
    progress: Option<CaptureProgress>,
    abort_reason: Option<AbortReason>,
}

impl FlowState {
    fn new() -> Self {
        Self {
            step: FlowStep::DeviceBind,
            device_id: None,
            device: DeviceStatus::default(),
            face: FaceEnrollmentState::default(),
            progress: Some(CaptureProgress::new()),
            abort_reason: None,
        }
    }

    fn advance(&mut self, to: FlowStep) -> CheckinResult<()> {
        if !self.step.can_transition_to(to) {
            return Err(CheckinError::StepNotReached(self.step));
        }
        if self.step != to {
            tracing::debug!(from = %self.step, to = %to, "Flow step changed");
            self.step = to;
        }
        Ok(())
    }

    fn ensure_live(&self) -> CheckinResult<()> {
        match &self.abort_reason {
            Some(AbortReason::SessionExpired) => return Err(CheckinError::SessionExpired),
            Some(AbortReason::SessionClosed(reason)) => {
                return Err(CheckinError::SessionClosed(reason.clone()));
            }
            Some(AbortReason::Abandoned) => return Err(CheckinError::FlowClosed),
            None => {}
        }
        if self.step == FlowStep::Done {
            return Err(CheckinError::AlreadySubmitted);
        }
        Ok(())
    }

    /// Live and at or past `step`
    fn require(&self, step: FlowStep) -> CheckinResult<()> {
        self.ensure_live()?;
        if !self.step.has_reached(step) {
            return Err(CheckinError::StepNotReached(self.step));
        }
        Ok(())
    }

    fn progress(&self) -> CheckinResult<&CaptureProgress> {
        self.progress.as_ref().ok_or(CheckinError::FlowClosed)
    }

    fn progress_mut(&mut self) -> CheckinResult<&mut CaptureProgress> {
        self.progress.as_mut().ok_or(CheckinError::FlowClosed)
    }

    /// The step that follows a captured selfie
    fn after_selfie(&self) -> FlowStep {
        match &self.progress {
            Some(progress) if progress.location_captured() => FlowStep::Submit,
            _ => FlowStep::CaptureLocation,
        }
    }

    fn at_face_gate(&self) -> CheckinResult<()> {
        self.ensure_live()?;
        if self.step != FlowStep::FaceGate {
            return Err(CheckinError::StepNotReached(self.step));
        }
        Ok(())
    }

    fn enter(&mut self, device_id: DeviceId, status: DeviceStatus) -> CheckinResult<()> {
        self.ensure_live()?;
        self.device_id = Some(device_id);
        self.device = status;
        self.face.enrolled = status.face_enrolled;
        if status.face_enrolled {
            self.advance(FlowStep::ScanCode)
        } else {
            self.advance(FlowStep::FaceGate)
        }
    }

    fn pending_reference(&self) -> CheckinResult<ImageArtifact> {
        self.at_face_gate()?;
        self.face
            .pending
            .clone()
            .ok_or(CheckinError::ReferenceImageMissing)
    }

    fn complete_enrollment(&mut self) -> CheckinResult<()> {
        self.ensure_live()?;
        self.face.enrolled = true;
        self.face.pending = None;
        self.device.face_enrolled = true;
        self.advance(FlowStep::ScanCode)
    }

    fn store_selfie(&mut self, image: ImageArtifact) -> CheckinResult<()> {
        self.require(FlowStep::CaptureSelfie)?;
        if self.progress()?.selfie_captured() {
            return Err(CheckinError::AlreadyCaptured("Selfie"));
        }
        self.progress_mut()?.selfie = Some(image);
        let next = self.after_selfie();
        self.advance(next)
    }

    fn discard_selfie(&mut self) -> CheckinResult<()> {
        self.require(FlowStep::CaptureSelfie)?;
        self.progress_mut()?.selfie = None;
        self.advance(FlowStep::CaptureSelfie)
    }

    fn stored_location(&self) -> CheckinResult<Option<GeoPoint>> {
        self.require(FlowStep::CaptureLocation)?;
        Ok(self.progress()?.location)
    }

    /// A stored fix can be replaced from any later step, including a
    /// reopened selfie step
    fn ensure_relocatable(&self) -> CheckinResult<()> {
        self.ensure_live()?;
        if self.progress()?.location_captured() {
            return Ok(());
        }
        self.require(FlowStep::CaptureLocation)
    }

    fn store_location(&mut self, flow_id: FlowId, point: GeoPoint) -> CheckinResult<GeoPoint> {
        self.ensure_live()?;
        let progress = self.progress_mut()?;
        // A fix for a discarded instance is never carried over
        if progress.flow_id != flow_id {
            return Err(CheckinError::FlowClosed);
        }
        progress.location = Some(point);
        if self.step == FlowStep::CaptureLocation {
            self.advance(FlowStep::Submit)?;
        }
        Ok(point)
    }

    /// Move to `Aborted` and drop every captured artifact
    fn abort(&mut self, reason: AbortReason) -> bool {
        if self.step.is_terminal() {
            return false;
        }
        self.step = FlowStep::Aborted;
        self.progress = None;
        self.face.pending = None;
        self.abort_reason = Some(reason);
        true
    }
}

/// State shared with the session clock watcher
struct FlowShared {
    session_id: SessionId,
    state: Mutex<FlowState>,
    notices: broadcast::Sender<Notice>,
}

impl FlowShared {
    fn lock(&self) -> MutexGuard<'_, FlowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FlowState) -> CheckinResult<T>) -> CheckinResult<T> {
        let mut state = self.lock();
        f(&mut state)
    }

    fn notify(&self, notice: Notice) {
        // No subscribers is fine
        let _ = self.notices.send(notice);
    }

    fn abort(&self, reason: AbortReason) -> bool {
        let aborted = self.lock().abort(reason.clone());
        if aborted {
            tracing::info!(session_id = %self.session_id, reason = ?reason, "Check-in aborted");
            match reason {
                AbortReason::SessionExpired => self.notify(Notice::session_ended(SESSION_ENDED)),
                AbortReason::SessionClosed(detail) => self.notify(Notice::session_ended(detail)),
                AbortReason::Abandoned => {}
            }
        }
        aborted
    }
}

pub struct CaptureFlowController<D, A, I, L>
where
    D: DeviceRepository,
    A: AttendanceRepository,
    I: IdentityProvider,
    L: Locator,
{
    devices: Arc<D>,
    identity: Arc<I>,
    locator: Arc<L>,
    coordinator: SubmissionCoordinator<A>,
    clock: Arc<dyn Clock>,
    codec: CodePayloadCodec,
    config: Arc<CheckinConfig>,
    ends_at: Option<DateTime<Utc>>,
    shared: Arc<FlowShared>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl<D, A, I, L> CaptureFlowController<D, A, I, L>
where
    D: DeviceRepository + Sync,
    A: AttendanceRepository + Sync,
    I: IdentityProvider + Sync,
    L: Locator + Sync,
{
    pub fn new(
        ports: FlowPorts<D, A, I, L>,
        clock: Arc<dyn Clock>,
        config: Arc<CheckinConfig>,
        session_id: SessionId,
        ends_at: Option<DateTime<Utc>>,
    ) -> Self {
        let (notices, _) = broadcast::channel(32);
        Self {
            devices: ports.devices,
            identity: ports.identity,
            locator: ports.locator,
            coordinator: SubmissionCoordinator::new(ports.attendance),
            clock,
            codec: config.codec(),
            config,
            ends_at,
            shared: Arc::new(FlowShared {
                session_id,
                state: Mutex::new(FlowState::new()),
                notices,
            }),
            watcher: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.shared.session_id
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.shared.notices.subscribe()
    }

    /// Enter the flow: start the session clock, then resolve and bind the
    /// device and read the face gate.
    ///
    /// Calling it again after a failed bind retries the bind; once past
    /// `DeviceBind` it only returns the current snapshot.
    pub async fn start<S: Scheduler>(&self, scheduler: &S) -> CheckinResult<FlowSnapshot> {
        let step = self
            .shared
            .with_state(|state| state.ensure_live().map(|()| state.step))
            .map_err(|e| self.fail("Check-in unavailable", e))?;
        if step != FlowStep::DeviceBind {
            return Ok(self.snapshot());
        }
        self.check_session_time()
            .map_err(|e| self.fail("Check-in unavailable", e))?;
        self.watch_session_clock(scheduler);

        let (device_id, status) = self
            .resolve_device()
            .await
            .map_err(|e| self.fail("Device registration failed", e))?;
        self.shared
            .with_state(|state| state.enter(device_id, status))
            .map_err(|e| self.fail("Check-in unavailable", e))?;

        if !status.active {
            self.shared.notify(Notice::warning(
                "Device pending approval",
                "This device is registered but not yet approved. Your check-in may be reviewed.",
            ));
        }

        tracing::info!(
            session_id = %self.shared.session_id,
            face_enrolled = status.face_enrolled,
            device_active = status.active,
            "Check-in started"
        );
        Ok(self.snapshot())
    }

    async fn resolve_device(&self) -> CheckinResult<(DeviceId, DeviceStatus)> {
        let raw = self.identity.get_or_create().await;
        let device_id = DeviceId::new(&raw).ok_or(CheckinError::DeviceIdMissing)?;

        let mut status = self.devices.status().await.map_err(bind_failure)?;
        if !status.bound {
            tracing::info!(device = %device_id.fingerprint(), "Binding device");
            self.devices.bind(&device_id).await.map_err(bind_failure)?;
            status = self.devices.status().await.map_err(bind_failure)?;
            if !status.bound {
                return Err(CheckinError::DeviceBindFailed(
                    "Device is still not registered".to_string(),
                ));
            }
        }
        Ok((device_id, status))
    }

    /// Keep a locally captured reference image for enrollment
    pub fn capture_reference(&self, image: ImageArtifact) -> CheckinResult<()> {
        self.shared
            .with_state(|state| {
                state.at_face_gate()?;
                state.face.pending = Some(image);
                Ok(())
            })
            .map_err(|e| self.fail("Reference photo", e))
    }

    /// Upload the pending reference image; opens the face gate on success
    pub async fn enroll_face(&self) -> CheckinResult<()> {
        let image = self
            .shared
            .with_state(|state| state.pending_reference())
            .map_err(|e| self.fail("Face enrollment failed", e))?;

        // The pending image stays in place on failure for a retry
        self.devices
            .enroll_face(&image)
            .await
            .map_err(|e| self.fail("Face enrollment failed", e))?;

        self.shared
            .with_state(|state| state.complete_enrollment())
            .map_err(|e| self.fail("Face enrollment failed", e))?;

        tracing::info!(session_id = %self.shared.session_id, "Reference face enrolled");
        self.shared
            .notify(Notice::success("Face enrolled", "Reference photo saved."));
        Ok(())
    }

    /// Decode a scanned code and lock it into this flow instance
    pub fn scan(&self, raw: &str) -> CheckinResult<()> {
        self.check_session_time()
            .map_err(|e| self.fail("Scan failed", e))?;
        self.lock_code(raw).map_err(|e| self.fail("Scan failed", e))
    }

    fn lock_code(&self, raw: &str) -> CheckinResult<()> {
        let mut state = self.shared.lock();
        state.ensure_live()?;
        if state.progress()?.code_scanned() {
            return Err(CheckinError::CodeAlreadyLocked);
        }
        if state.step != FlowStep::ScanCode {
            return Err(CheckinError::StepNotReached(state.step));
        }

        let decoded = self.codec.decode(raw, self.shared.session_id)?;
        let now = self.clock.now();
        if decoded.expires_at.is_some_and(|expires_at| expires_at <= now) {
            return Err(CheckinError::CodeExpired);
        }

        let code = RotatingCode::lock(decoded, now, self.config.code_ttl_chrono());
        tracing::info!(
            session_id = %code.session_id,
            expires_at = %code.expires_at,
            "Code locked"
        );
        state.progress_mut()?.code = Some(code);
        state.advance(FlowStep::CaptureSelfie)
    }

    pub fn capture_selfie(&self, image: ImageArtifact) -> CheckinResult<()> {
        self.shared
            .with_state(|state| state.store_selfie(image))
            .map_err(|e| self.fail("Selfie", e))
    }

    /// Discard the selfie and reopen the selfie step; earlier proofs and the
    /// location stay as they are
    pub fn retake_selfie(&self) -> CheckinResult<()> {
        self.shared
            .with_state(|state| state.discard_selfie())
            .map_err(|e| self.fail("Selfie", e))
    }

    /// Capture the position once; an existing fix is returned as is
    pub async fn locate(&self) -> CheckinResult<GeoPoint> {
        let existing = self
            .shared
            .with_state(|state| state.stored_location())
            .map_err(|e| self.fail("Location", e))?;
        match existing {
            Some(point) => Ok(point),
            None => self.request_location().await,
        }
    }

    /// Explicitly ask for a new position, replacing the stored one
    ///
    /// Allowed once the location step is reached, or whenever a fix is
    /// already stored (e.g. after a selfie retake).
    pub async fn relocate(&self) -> CheckinResult<GeoPoint> {
        self.shared
            .with_state(|state| state.ensure_relocatable())
            .map_err(|e| self.fail("Location", e))?;
        self.request_location().await
    }

    async fn request_location(&self) -> CheckinResult<GeoPoint> {
        let flow_id = self
            .shared
            .with_state(|state| state.progress().map(|p| p.flow_id))
            .map_err(|e| self.fail("Location", e))?;

        let point = match tokio::time::timeout(
            self.config.location_timeout,
            self.locator.current_position(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(CheckinError::LocationUnavailable(
                "Timed out waiting for a position".to_string(),
            )),
        }
        .map_err(|e| self.fail("Location", e))?;

        let point = self
            .shared
            .with_state(|state| state.store_location(flow_id, point))
            .map_err(|e| self.fail("Location", e))?;
        tracing::debug!(session_id = %self.shared.session_id, "Location captured");
        Ok(point)
    }

    /// Re-validate every proof against the current time
    fn check_ready(&self) -> CheckinResult<(FlowId, Submission)> {
        let state = self.shared.lock();
        state.ensure_live()?;
        let now = self.clock.now();
        if self.ends_at.is_some_and(|ends_at| ends_at <= now) {
            return Err(CheckinError::SessionExpired);
        }
        if !state.face.enrolled {
            return Err(CheckinError::FaceNotEnrolled);
        }
        let device_id = state.device_id.clone().ok_or(CheckinError::DeviceIdMissing)?;
        let progress = state.progress()?;

        let code = progress
            .code
            .as_ref()
            .ok_or(CheckinError::MissingProof("scanned code"))?;
        if code.consumed {
            return Err(CheckinError::AlreadySubmitted);
        }
        if !code.is_valid_at(now, true) {
            return Err(CheckinError::CodeExpired);
        }
        let selfie = progress
            .selfie
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(CheckinError::MissingProof("selfie"))?;
        let location = progress
            .location
            .ok_or(CheckinError::MissingProof("location"))?;

        Ok((
            progress.flow_id,
            Submission {
                session_id: code.session_id,
                nonce: code.nonce.clone(),
                device_id,
                location,
                selfie,
            },
        ))
    }

    /// Face enrolled, code locked and still valid, selfie and location
    /// present, nothing in flight
    pub fn can_submit(&self) -> bool {
        !self.coordinator.is_submitting() && self.check_ready().is_ok()
    }

    /// Send the check-in
    ///
    /// On success the instance is finished and its artifacts dropped. On a
    /// failure that does not end the session every artifact is kept.
    pub async fn submit(&self) -> CheckinResult<SubmissionOutcome> {
        let (flow_id, submission) = match self.check_ready() {
            Ok(ready) => ready,
            Err(CheckinError::SessionExpired) => {
                self.shared.abort(AbortReason::SessionExpired);
                return Err(CheckinError::SessionExpired);
            }
            Err(e) => return Err(self.fail("Check-in failed", e)),
        };

        let outcome = self
            .coordinator
            .submit(&submission)
            .await
            .map_err(|e| self.fail("Check-in failed", e))?;

        {
            let mut state = self.shared.lock();
            let current = state.progress.as_ref().map(|p| p.flow_id);
            if current == Some(flow_id) {
                if let Some(code) = state.progress.as_mut().and_then(|p| p.code.as_mut()) {
                    code.consume();
                }
                if state.advance(FlowStep::Done).is_ok() {
                    state.progress = None;
                }
            }
        }

        self.shared.notify(outcome.notice.clone());
        Ok(outcome)
    }

    /// Leave the flow: stops the session clock and discards artifacts
    pub fn abandon(&self) {
        self.stop_watcher();
        self.shared.abort(AbortReason::Abandoned);
    }

    /// Begin a fresh instance for the same session
    ///
    /// Device binding and enrollment carry over; the scanned code, selfie
    /// and location do not. This is the only way to replace a locked code.
    pub fn restart(&self) -> CheckinResult<FlowSnapshot> {
        {
            let mut state = self.shared.lock();
            match &state.abort_reason {
                Some(AbortReason::SessionExpired) => return Err(CheckinError::SessionExpired),
                Some(AbortReason::SessionClosed(reason)) => {
                    return Err(CheckinError::SessionClosed(reason.clone()));
                }
                Some(AbortReason::Abandoned) => return Err(CheckinError::FlowClosed),
                None => {}
            }

            let progress = CaptureProgress::new();
            tracing::info!(
                session_id = %self.shared.session_id,
                flow_id = %progress.flow_id,
                "Check-in restarted"
            );
            state.progress = Some(progress);
            state.face.pending = None;
            // A new instance, so the step is set rather than transitioned
            state.step = match (&state.device_id, state.device.bound, state.face.enrolled) {
                (Some(_), true, true) => FlowStep::ScanCode,
                (Some(_), true, false) => FlowStep::FaceGate,
                _ => FlowStep::DeviceBind,
            };
        }
        self.check_session_time()?;
        Ok(self.snapshot())
    }

    pub fn step(&self) -> FlowStep {
        self.shared.lock().step
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        let can_submit = self.can_submit();
        let state = self.shared.lock();
        let progress = state.progress.as_ref();
        FlowSnapshot {
            session_id: self.shared.session_id,
            step: state.step,
            flow_id: progress.map(|p| p.flow_id),
            device: state.device,
            face_enrolled: state.face.enrolled,
            reference_pending: state.face.pending.is_some(),
            code_locked: progress.is_some_and(|p| p.code_scanned()),
            selfie_captured: progress.is_some_and(|p| p.selfie_captured()),
            location: progress.and_then(|p| p.location),
            can_submit,
            submitting: self.coordinator.is_submitting(),
            abort_reason: state.abort_reason.clone(),
        }
    }

    /// Abort when the session end time has passed
    fn check_session_time(&self) -> CheckinResult<()> {
        let now = self.clock.now();
        if self.ends_at.is_some_and(|ends_at| ends_at <= now) {
            self.shared.abort(AbortReason::SessionExpired);
            return Err(CheckinError::SessionExpired);
        }
        Ok(())
    }

    fn watch_session_clock<S: Scheduler>(&self, scheduler: &S) {
        let Some(ends_at) = self.ends_at else {
            return;
        };
        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if watcher.is_some() {
            return;
        }

        let mut handle = SessionClock::new(ends_at).spawn(
            scheduler,
            self.clock.now(),
            self.config.tick_interval,
        );
        let shared = Arc::clone(&self.shared);
        *watcher = Some(tokio::spawn(async move {
            while let Some(event) = handle.next().await {
                if event == ClockEvent::Expired {
                    shared.abort(AbortReason::SessionExpired);
                    break;
                }
            }
        }));
    }

    fn stop_watcher(&self) {
        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = watcher.take() {
            task.abort();
        }
    }

    /// Log, notify, and abort on errors that end the session
    fn fail(&self, title: &str, err: CheckinError) -> CheckinError {
        err.log();
        match &err {
            CheckinError::SessionExpired => {
                self.shared.abort(AbortReason::SessionExpired);
            }
            CheckinError::SessionClosed(reason) => {
                self.shared.abort(AbortReason::SessionClosed(reason.clone()));
            }
            _ => self.shared.notify(Notice::from_error(title, &err)),
        }
        err
    }
}

impl<D, A, I, L> Drop for CaptureFlowController<D, A, I, L>
where
    D: DeviceRepository,
    A: AttendanceRepository,
    I: IdentityProvider,
    L: Locator,
{
    fn drop(&mut self) {
        let watcher = self
            .watcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = watcher.take() {
            task.abort();
        }
    }
}

/// Bind-step failures other than session end become `DeviceBindFailed`
fn bind_failure(err: CheckinError) -> CheckinError {
    match err {
        CheckinError::SessionExpired
        | CheckinError::SessionClosed(_)
        | CheckinError::DeviceBindFailed(_) => err,
        other => CheckinError::DeviceBindFailed(other.to_string()),
    }
}
