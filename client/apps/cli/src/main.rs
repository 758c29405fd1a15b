//! Absense Command Line Client
//!
//! Both roles on a terminal: the instructor code display and the
//! participant check-in. Uses `anyhow` for startup errors; check-in errors
//! go through `kernel::error::AppError` so their suggested action is shown.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use checkin::application::active_sessions::ListActiveSessionsUseCase;
use checkin::application::capture_flow::{CaptureFlowController, FlowPorts};
use checkin::application::code_rotation::CodeRotationController;
use checkin::application::device_identity::DeviceIdentity;
use checkin::domain::flow::FlowStep;
use checkin::infra::StaticLocator;
use checkin::models::ImageArtifact;
use checkin::presentation::notice::Notice;
use checkin::presentation::view::{CodePhase, RotationStatus, RotationView};
use checkin::{AppError, CheckinConfig, CheckinError, ErrorKind, HttpCheckinApi};
use clap::{Parser, Subcommand};
use kernel::error::app_error::{AppResult, OptionExt, ResultExt};
use kernel::id::SessionId;
use platform::storage::FileStore;
use platform::time::{SystemClock, TokioScheduler};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "absense", version, about = "Attendance check-in client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List sessions open for check-in
    Sessions,
    /// Show the rotating code for a session (instructor)
    Display {
        session: SessionId,
        /// Start in projector mode
        #[arg(long)]
        projector: bool,
    },
    /// Check in to a session (participant)
    CheckIn {
        session: SessionId,
        /// Scanned code text
        #[arg(long)]
        code: String,
        /// Live selfie image
        #[arg(long)]
        selfie: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        /// Reference face image, needed once per account
        #[arg(long)]
        reference: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "absense=info,checkin=info,platform=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Arc::new(CheckinConfig::from_env()?);
    let api = Arc::new(HttpCheckinApi::new(&config).map_err(AppError::from)?);

    tracing::debug!(api = %config.api_base_url, "Configuration loaded");

    match cli.command {
        Command::Sessions => list_sessions(api).await,
        Command::Display { session, projector } => display(api, config, session, projector).await,
        Command::CheckIn {
            session,
            code,
            selfie,
            lat,
            lng,
            reference,
        } => {
            let proofs = Proofs {
                code,
                selfie,
                lat,
                lng,
                reference,
            };
            check_in(api, config, session, proofs).await
        }
    }
}

async fn list_sessions(api: Arc<HttpCheckinApi>) -> anyhow::Result<()> {
    let sessions = ListActiveSessionsUseCase::new(api)
        .execute(chrono::Utc::now())
        .await
        .map_err(AppError::from)?;

    if sessions.is_empty() {
        println!("No open sessions");
        return Ok(());
    }
    for session in sessions {
        let ends = session
            .ends_at
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let marked = if session.already_marked { "  (marked)" } else { "" };
        println!(
            "{:>6}  {:<8}  until {}  {}{}",
            session.id,
            session.join_code,
            ends,
            session.course.label(),
            marked
        );
    }
    Ok(())
}

async fn display(
    api: Arc<HttpCheckinApi>,
    config: Arc<CheckinConfig>,
    session: SessionId,
    projector: bool,
) -> anyhow::Result<()> {
    let controller = CodeRotationController::new(api, config);
    let mut handle = controller.start(&TokioScheduler, Arc::new(SystemClock), session, None);
    handle.set_projector(projector);
    let mut notices = handle.subscribe_notices();
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    eprintln!("r = rotate now, p = toggle projector, q = quit");
    loop {
        tokio::select! {
            view = handle.changed() => match view {
                Some(view) => {
                    render(&view);
                    if view.is_closed() {
                        break;
                    }
                }
                None => break,
            },
            notice = notices.recv() => match notice {
                Ok(notice) => eprintln!("{notice}"),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            line = input.next_line() => match line.context("Failed to read stdin")? {
                Some(line) => match line.trim() {
                    "r" => handle.rotate_now(),
                    "p" => handle.toggle_projector(),
                    "q" => {
                        handle.close();
                        break;
                    }
                    _ => {}
                },
                None => break,
            },
        }
    }
    Ok(())
}

fn render(view: &RotationView) {
    let session = view
        .session_countdown
        .map(|c| format!("  session {}", c.label()))
        .unwrap_or_default();
    match &view.status {
        RotationStatus::Loading => println!("Loading code..."),
        RotationStatus::Closed { reason } => println!("Closed: {reason}"),
        RotationStatus::Displaying | RotationStatus::Refreshing => {
            let Some(code) = &view.code else {
                return;
            };
            let marker = match view.phase() {
                Some(CodePhase::Rotating) => "~",
                Some(CodePhase::AboutToRotate) => "!",
                _ => " ",
            };
            let countdown = view
                .code_countdown
                .map(|c| c.label())
                .unwrap_or_default();
            let code_text = if view.theme().code_scale() > 1 {
                code.code_text.to_uppercase()
            } else {
                code.code_text.clone()
            };
            println!(
                "{marker} {code_text}  [{}]  {countdown}{session}",
                code.join_code.as_deref().unwrap_or("-")
            );
        }
    }
}

struct Proofs {
    code: String,
    selfie: PathBuf,
    lat: f64,
    lng: f64,
    reference: Option<PathBuf>,
}

async fn check_in(
    api: Arc<HttpCheckinApi>,
    config: Arc<CheckinConfig>,
    session_id: SessionId,
    proofs: Proofs,
) -> anyhow::Result<()> {
    let session = ListActiveSessionsUseCase::new(Arc::clone(&api))
        .find(chrono::Utc::now(), session_id)
        .await
        .map_err(AppError::from)?
        .ok_or_not_found(format!("Session {session_id} is not open for check-in"))?;
    if session.already_marked {
        println!("Attendance already recorded for {}", session.course.label());
        return Ok(());
    }

    let store = Arc::new(FileStore::new(config.state_path.clone()));
    let identity = Arc::new(DeviceIdentity::new(store, config.device_id_key.clone()));
    let locator = Arc::new(StaticLocator::at(proofs.lat, proofs.lng).map_err(AppError::from)?);

    let flow = CaptureFlowController::new(
        FlowPorts {
            devices: Arc::clone(&api),
            attendance: Arc::clone(&api),
            identity,
            locator,
        },
        Arc::new(SystemClock),
        Arc::clone(&config),
        session.id,
        session.ends_at,
    );
    let mut notices = flow.subscribe_notices();

    let result = async {
        let snapshot = flow.start(&TokioScheduler).await?;
        if snapshot.step == FlowStep::FaceGate {
            let path = proofs.reference.as_deref().ok_or_app_err(
                ErrorKind::BadRequest,
                "No reference face on file; pass --reference <image>",
            )?;
            flow.capture_reference(read_image(path).await?)?;
            flow.enroll_face().await?;
        }
        flow.scan(&proofs.code)?;
        flow.capture_selfie(read_image(&proofs.selfie).await?)?;
        flow.locate().await?;
        flow.submit().await?;
        anyhow::Ok(())
    }
    .await;

    drain(&mut notices);
    if let Err(err) = &result {
        if err
            .downcast_ref::<CheckinError>()
            .is_some_and(CheckinError::is_transient)
        {
            eprintln!("Temporary failure; run check-in again to retry");
        }
    }
    result
}

async fn read_image(path: &Path) -> AppResult<ImageArtifact> {
    let bytes = tokio::fs::read(path)
        .await
        .map_app_err(ErrorKind::BadRequest, format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    ImageArtifact::new(file_name, bytes)
        .ok_or_app_err(ErrorKind::BadRequest, format!("{} is empty", path.display()))
}

/// Print the notices raised so far
fn drain(notices: &mut broadcast::Receiver<Notice>) {
    loop {
        match notices.try_recv() {
            Ok(notice) => println!("{notice}"),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
}
