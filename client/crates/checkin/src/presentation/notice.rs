//! Transient user-facing notices (toasts)

use std::fmt;

use crate::error::CheckinError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
    /// Must be acknowledged before anything else happens on screen
    pub blocking: bool,
}

impl Notice {
    fn new(level: NoticeLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
            blocking: false,
        }
    }

    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, title, message)
    }

    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, title, message)
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, title, message)
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, title, message)
    }

    /// Blocking "session ended" notice
    pub fn session_ended(reason: impl Into<String>) -> Self {
        Self {
            blocking: true,
            ..Self::error("Session ended", reason)
        }
    }

    /// Error notice carrying the error text verbatim
    pub fn from_error(title: impl Into<String>, err: &CheckinError) -> Self {
        if err.is_session_terminal() {
            Self::session_ended(err.to_string())
        } else {
            Self::error(title, err.to_string())
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}
