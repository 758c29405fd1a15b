//! List Active Sessions Use Case

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kernel::id::SessionId;

use crate::domain::entities::Session;
use crate::domain::repository::SessionRepository;
use crate::error::CheckinResult;

pub struct ListActiveSessionsUseCase<R>
where
    R: SessionRepository,
{
    session_repo: Arc<R>,
}

impl<R> ListActiveSessionsUseCase<R>
where
    R: SessionRepository + Sync,
{
    pub fn new(session_repo: Arc<R>) -> Self {
        Self { session_repo }
    }

    /// Sessions open at `now`, the one closing first leading
    pub async fn execute(&self, now: DateTime<Utc>) -> CheckinResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .session_repo
            .active_sessions()
            .await?
            .into_iter()
            .filter(|session| session.is_open_at(now))
            .collect();
        // Sessions without an end time go last
        sessions.sort_by_key(|session| (session.ends_at.is_none(), session.ends_at));

        tracing::debug!(count = sessions.len(), "Active sessions listed");
        Ok(sessions)
    }

    pub async fn find(&self, now: DateTime<Utc>, session_id: SessionId) -> CheckinResult<Option<Session>> {
        let sessions = self.execute(now).await?;
        Ok(sessions.into_iter().find(|session| session.id == session_id))
    }
}
