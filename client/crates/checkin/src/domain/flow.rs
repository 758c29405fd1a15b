//! Capture Flow Steps
//!
//! The participant flow as a tagged state with an explicit transition table.

use std::fmt;

/// Steps of a participant check-in, in required order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FlowStep {
    DeviceBind,
    FaceGate,
    ScanCode,
    CaptureSelfie,
    CaptureLocation,
    Submit,
    Done,
    Aborted,
}

impl FlowStep {
    /// Allowed moves. Self-transitions are always allowed.
    ///
    /// | from            | to                                   |
    /// |-----------------|--------------------------------------|
    /// | DeviceBind      | FaceGate, ScanCode                   |
    /// | FaceGate        | ScanCode                             |
    /// | ScanCode        | CaptureSelfie                        |
    /// | CaptureSelfie   | CaptureLocation, Submit              |
    /// | CaptureLocation | Submit, CaptureSelfie                |
    /// | Submit          | Done, CaptureSelfie                  |
    /// | any live step   | Aborted                              |
    ///
    /// `DeviceBind -> ScanCode` covers accounts that already enrolled a face.
    /// `CaptureSelfie -> Submit` covers a retake after location was captured.
    pub fn can_transition_to(self, to: FlowStep) -> bool {
        use FlowStep::*;

        if self == to {
            return true;
        }
        match (self, to) {
            (Done | Aborted, _) => false,
            (_, Aborted) => true,
            (DeviceBind, FaceGate | ScanCode) => true,
            (FaceGate, ScanCode) => true,
            (ScanCode, CaptureSelfie) => true,
            (CaptureSelfie, CaptureLocation | Submit) => true,
            (CaptureLocation, Submit | CaptureSelfie) => true,
            (Submit, Done | CaptureSelfie) => true,
            _ => false,
        }
    }

    /// `Done` or `Aborted`
    pub fn is_terminal(self) -> bool {
        matches!(self, FlowStep::Done | FlowStep::Aborted)
    }

    /// Whether an operation that belongs to `step` may run now
    pub fn has_reached(self, step: FlowStep) -> bool {
        !self.is_terminal() && self >= step
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FlowStep::DeviceBind => "device binding",
            FlowStep::FaceGate => "face enrollment",
            FlowStep::ScanCode => "scan code",
            FlowStep::CaptureSelfie => "selfie",
            FlowStep::CaptureLocation => "location",
            FlowStep::Submit => "submit",
            FlowStep::Done => "done",
            FlowStep::Aborted => "closed",
        }
    }
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a flow instance ended without a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Session end time reached on the local clock
    SessionExpired,
    /// Server reported the session ended or inactive
    SessionClosed(String),
    /// Participant left the flow
    Abandoned,
}
