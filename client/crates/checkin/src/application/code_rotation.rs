//! Code Rotation Controller (instructor display)
//!
//! Keeps the session's current code on screen. One task owns all display
//! state; ticks, commands and fetch results are handled in arrival order,
//! so the last fetch to come back is the code shown.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kernel::id::SessionId;
use platform::time::{Clock, Scheduler, Ticker};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::application::config::CheckinConfig;
use crate::application::session_clock::{ClockEvent, Countdown, SessionClock};
use crate::domain::entities::{DisplayedCode, RotatedCode};
use crate::domain::repository::SessionRepository;
use crate::domain::services::CodePayloadCodec;
use crate::error::{CheckinError, CheckinResult};
use crate::presentation::notice::Notice;
use crate::presentation::view::{RotationStatus, RotationView};

const SESSION_ENDED: &str = "Session has ended";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationCommand {
    /// Mint a new code now
    RotateNow,
    SetProjector(bool),
    ToggleProjector,
    Close,
}

#[derive(Debug, Clone, PartialEq)]
enum RotationState {
    Loading,
    Displaying(DisplayedCode),
    /// The previous code stays visible until the replacement arrives
    Refreshing(DisplayedCode),
    Closed { reason: String },
}

#[derive(Debug, Clone, Copy)]
enum FetchKind {
    Display,
    Rotate,
}

type FetchOutcome = (FetchKind, CheckinResult<DisplayedCode>);

pub struct CodeRotationController<R>
where
    R: SessionRepository,
{
    session_repo: Arc<R>,
    config: Arc<CheckinConfig>,
}

impl<R> CodeRotationController<R>
where
    R: SessionRepository + Send + Sync + 'static,
{
    pub fn new(session_repo: Arc<R>, config: Arc<CheckinConfig>) -> Self {
        Self {
            session_repo,
            config,
        }
    }

    /// Start displaying codes for a session
    ///
    /// `session_ends_at` is optional; the display response can also carry it.
    pub fn start<S: Scheduler>(
        &self,
        scheduler: &S,
        clock: Arc<dyn Clock>,
        session_id: SessionId,
        session_ends_at: Option<DateTime<Utc>>,
    ) -> RotationHandle {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (view_tx, view) = watch::channel(RotationView::loading(session_id));
        let (notices, _) = broadcast::channel(32);
        let ticker = scheduler.every(self.config.tick_interval);

        let task = RotationTask {
            session_id,
            session_repo: Arc::clone(&self.session_repo),
            codec: self.config.codec(),
            config: Arc::clone(&self.config),
            clock,
            state: RotationState::Loading,
            session_clock: session_ends_at.map(SessionClock::new),
            projector: false,
            retry_pending: false,
            view_tx,
            notices: notices.clone(),
        };

        tracing::info!(session_id = %session_id, "Code display started");
        let task = tokio::spawn(task.run(ticker, commands));

        RotationHandle {
            commands: commands_tx,
            view,
            notices,
            task,
        }
    }
}

struct RotationTask<R>
where
    R: SessionRepository,
{
    session_id: SessionId,
    session_repo: Arc<R>,
    codec: CodePayloadCodec,
    config: Arc<CheckinConfig>,
    clock: Arc<dyn Clock>,
    state: RotationState,
    session_clock: Option<SessionClock>,
    projector: bool,
    /// Last fetch failed for a reason other than session end
    retry_pending: bool,
    view_tx: watch::Sender<RotationView>,
    notices: broadcast::Sender<Notice>,
}

impl<R> RotationTask<R>
where
    R: SessionRepository + Send + Sync + 'static,
{
    async fn run<T: Ticker>(
        mut self,
        mut ticker: T,
        mut commands: mpsc::UnboundedReceiver<RotationCommand>,
    ) {
        let mut fetches: JoinSet<FetchOutcome> = JoinSet::new();

        self.check_session_clock();
        if !self.is_closed() {
            self.spawn_fetch(&mut fetches, FetchKind::Display);
        }
        self.publish();

        while !self.is_closed() {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(&mut fetches, command),
                    None => self.close("Display dismissed".to_string(), None),
                },
                tick = ticker.tick() => match tick {
                    Some(_) => self.on_tick(&mut fetches),
                    None => self.close("Display dismissed".to_string(), None),
                },
                Some(joined) = fetches.join_next(), if !fetches.is_empty() => match joined {
                    Ok(outcome) => self.on_fetch(&fetches, outcome),
                    Err(e) => {
                        tracing::error!(error = %e, "Code fetch task failed");
                        self.retry_pending = fetches.is_empty();
                    }
                },
            }
            self.publish();
        }

        // Dropping `fetches` aborts anything still pending
        tracing::info!(session_id = %self.session_id, "Code display stopped");
    }

    fn on_command(&mut self, fetches: &mut JoinSet<FetchOutcome>, command: RotationCommand) {
        match command {
            RotationCommand::RotateNow => {
                tracing::info!(session_id = %self.session_id, "Manual code rotation");
                if let RotationState::Displaying(code) = &self.state {
                    self.state = RotationState::Refreshing(code.clone());
                }
                self.spawn_fetch(fetches, FetchKind::Rotate);
            }
            RotationCommand::SetProjector(on) => self.projector = on,
            RotationCommand::ToggleProjector => self.projector = !self.projector,
            RotationCommand::Close => self.close("Display closed".to_string(), None),
        }
    }

    fn on_tick(&mut self, fetches: &mut JoinSet<FetchOutcome>) {
        self.check_session_clock();
        if self.is_closed() {
            return;
        }

        let now = self.clock.now();
        let lead = self.config.refresh_lead_chrono();
        match &self.state {
            RotationState::Displaying(code) if code.expires_at - lead <= now => {
                if fetches.is_empty() {
                    tracing::debug!(session_id = %self.session_id, "Code expired, refreshing");
                    self.state = RotationState::Refreshing(code.clone());
                    self.spawn_fetch(fetches, FetchKind::Display);
                }
            }
            RotationState::Loading | RotationState::Refreshing(_)
                if self.retry_pending && fetches.is_empty() =>
            {
                tracing::debug!(session_id = %self.session_id, "Retrying code fetch");
                self.spawn_fetch(fetches, FetchKind::Display);
            }
            _ => {}
        }
    }

    fn on_fetch(&mut self, fetches: &JoinSet<FetchOutcome>, (kind, result): FetchOutcome) {
        if self.is_closed() {
            return;
        }
        match result {
            Ok(code) => {
                tracing::debug!(
                    session_id = %self.session_id,
                    kind = ?kind,
                    expires_at = %code.expires_at,
                    "Code received"
                );
                if let Some(ends_at) = code.session_ends_at {
                    self.track_session_end(ends_at);
                }
                self.retry_pending = false;
                self.state = RotationState::Displaying(code);
                self.check_session_clock();
            }
            Err(err) if err.is_session_terminal() => {
                err.log();
                let reason = err.to_string();
                self.close(reason.clone(), Some(Notice::session_ended(reason)));
            }
            Err(err) => {
                err.log();
                let _ = self
                    .notices
                    .send(Notice::from_error("Could not refresh code", &err));
                // Retry on the next tick unless another fetch is still out
                self.retry_pending = fetches.is_empty();
                if let RotationState::Refreshing(code) = &self.state {
                    if matches!(kind, FetchKind::Rotate) && fetches.is_empty() {
                        self.state = RotationState::Displaying(code.clone());
                    }
                }
            }
        }
    }

    fn spawn_fetch(&mut self, fetches: &mut JoinSet<FetchOutcome>, kind: FetchKind) {
        self.retry_pending = false;
        let repo = Arc::clone(&self.session_repo);
        let session_id = self.session_id;

        match kind {
            FetchKind::Display => {
                fetches.spawn(async move { (kind, repo.display_code(session_id).await) });
            }
            FetchKind::Rotate => {
                let ttl = self.config.rotate_ttl;
                let codec = self.codec.clone();
                let previous = self.current_code().cloned();
                fetches.spawn(async move {
                    let result = repo
                        .rotate_code(session_id, ttl)
                        .await
                        .map(|rotated| displayed_from_rotation(&codec, rotated, previous.as_ref()));
                    (kind, result)
                });
            }
        }
    }

    fn track_session_end(&mut self, ends_at: DateTime<Utc>) {
        let unchanged = self
            .session_clock
            .as_ref()
            .is_some_and(|clock| clock.ends_at() == ends_at);
        if !unchanged {
            self.session_clock = Some(SessionClock::new(ends_at));
        }
    }

    fn check_session_clock(&mut self) {
        let now = self.clock.now();
        let expired = self
            .session_clock
            .as_mut()
            .and_then(|clock| clock.tick(now))
            .is_some_and(|event| event == ClockEvent::Expired);
        if expired {
            self.close(
                SESSION_ENDED.to_string(),
                Some(Notice::session_ended(SESSION_ENDED)),
            );
        }
    }

    fn close(&mut self, reason: String, notice: Option<Notice>) {
        if self.is_closed() {
            return;
        }
        tracing::info!(session_id = %self.session_id, reason = %reason, "Code display closed");
        if let Some(clock) = self.session_clock.as_mut() {
            clock.cancel();
        }
        self.state = RotationState::Closed { reason };
        if let Some(notice) = notice {
            let _ = self.notices.send(notice);
        }
    }

    fn is_closed(&self) -> bool {
        matches!(self.state, RotationState::Closed { .. })
    }

    fn current_code(&self) -> Option<&DisplayedCode> {
        match &self.state {
            RotationState::Displaying(code) | RotationState::Refreshing(code) => Some(code),
            _ => None,
        }
    }

    fn publish(&self) {
        let now = self.clock.now();
        let (status, code) = match &self.state {
            RotationState::Loading => (RotationStatus::Loading, None),
            RotationState::Displaying(code) => (RotationStatus::Displaying, Some(code.clone())),
            RotationState::Refreshing(code) => (RotationStatus::Refreshing, Some(code.clone())),
            RotationState::Closed { reason } => (
                RotationStatus::Closed {
                    reason: reason.clone(),
                },
                None,
            ),
        };
        let view = RotationView {
            session_id: self.session_id,
            status,
            code_countdown: code
                .as_ref()
                .map(|c| Countdown::between(now, c.expires_at)),
            code,
            session_countdown: self
                .session_clock
                .as_ref()
                .map(|clock| clock.remaining(now)),
            projector: self.projector,
        };
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}

/// Rotation answers carry no course data; keep what the display showed
fn displayed_from_rotation(
    codec: &CodePayloadCodec,
    rotated: RotatedCode,
    previous: Option<&DisplayedCode>,
) -> DisplayedCode {
    let code_text = rotated
        .code_text
        .unwrap_or_else(|| codec.encode_literal(rotated.session_id, &rotated.nonce));
    DisplayedCode {
        session_id: rotated.session_id,
        code_text,
        join_code: previous.and_then(|p| p.join_code.clone()),
        course_label: previous.and_then(|p| p.course_label.clone()),
        expires_at: rotated.expires_at,
        session_ends_at: previous.and_then(|p| p.session_ends_at),
    }
}

/// Handle to a running display
///
/// Dropping it stops the display and every pending timer and fetch.
#[derive(Debug)]
pub struct RotationHandle {
    commands: mpsc::UnboundedSender<RotationCommand>,
    view: watch::Receiver<RotationView>,
    notices: broadcast::Sender<Notice>,
    task: JoinHandle<()>,
}

impl RotationHandle {
    pub fn send(&self, command: RotationCommand) {
        if self.commands.send(command).is_err() {
            tracing::debug!(?command, "Code display already stopped");
        }
    }

    pub fn rotate_now(&self) {
        self.send(RotationCommand::RotateNow);
    }

    pub fn toggle_projector(&self) {
        self.send(RotationCommand::ToggleProjector);
    }

    pub fn set_projector(&self, on: bool) {
        self.send(RotationCommand::SetProjector(on));
    }

    pub fn close(&self) {
        self.send(RotationCommand::Close);
    }

    /// Latest snapshot
    pub fn view(&self) -> RotationView {
        self.view.borrow().clone()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Wait for the next snapshot; `None` once the display has stopped
    pub async fn changed(&mut self) -> Option<RotationView> {
        self.view.changed().await.ok()?;
        Some(self.view.borrow_and_update().clone())
    }

    /// Wait until a snapshot satisfies `predicate`
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&RotationView) -> bool,
    ) -> CheckinResult<RotationView> {
        self.view
            .wait_for(predicate)
            .await
            .map(|view| view.clone())
            .map_err(|_| CheckinError::Internal("Code display stopped".to_string()))
    }

    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RotationHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
