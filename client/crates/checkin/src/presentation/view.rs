//! Display view models
//!
//! Read-only snapshots the instructor display renders. Projector mode only
//! changes how a snapshot is drawn.

use kernel::id::SessionId;

use crate::application::session_clock::Countdown;
use crate::domain::entities::DisplayedCode;

/// Seconds left at which the code starts to pulse
pub const ABOUT_TO_ROTATE_SECS: i64 = 8;
/// Seconds left at which a refresh spinner is shown
pub const ROTATING_SECS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    Standard,
    /// Dark background, enlarged code
    Projector,
}

impl Theme {
    pub fn for_projector(projector: bool) -> Self {
        if projector {
            Theme::Projector
        } else {
            Theme::Standard
        }
    }

    /// Module size multiplier for the rendered code
    pub fn code_scale(&self) -> u8 {
        match self {
            Theme::Standard => 1,
            Theme::Projector => 2,
        }
    }

    pub fn is_inverted(&self) -> bool {
        matches!(self, Theme::Projector)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodePhase {
    Steady,
    AboutToRotate,
    Rotating,
}

impl CodePhase {
    pub fn from_countdown(countdown: Countdown) -> Self {
        match countdown.seconds() {
            s if s <= ROTATING_SECS => CodePhase::Rotating,
            s if s <= ABOUT_TO_ROTATE_SECS => CodePhase::AboutToRotate,
            _ => CodePhase::Steady,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationStatus {
    Loading,
    Displaying,
    /// Fetching a replacement; the previous code stays on screen
    Refreshing,
    Closed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RotationView {
    pub session_id: SessionId,
    pub status: RotationStatus,
    pub code: Option<DisplayedCode>,
    pub code_countdown: Option<Countdown>,
    pub session_countdown: Option<Countdown>,
    pub projector: bool,
}

impl RotationView {
    pub fn loading(session_id: SessionId) -> Self {
        Self {
            session_id,
            status: RotationStatus::Loading,
            code: None,
            code_countdown: None,
            session_countdown: None,
            projector: false,
        }
    }

    pub fn theme(&self) -> Theme {
        Theme::for_projector(self.projector)
    }

    pub fn phase(&self) -> Option<CodePhase> {
        match self.status {
            RotationStatus::Refreshing => Some(CodePhase::Rotating),
            RotationStatus::Displaying => self.code_countdown.map(CodePhase::from_countdown),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.status, RotationStatus::Closed { .. })
    }

    pub fn code_text(&self) -> Option<&str> {
        self.code.as_ref().map(|c| c.code_text.as_str())
    }
}
