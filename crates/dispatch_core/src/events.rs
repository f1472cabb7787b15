//! Session events delivered to the requester's live connection.
//!
//! Delivery is best-effort: the session transition is the source of truth
//! and a failed notify is logged, never rolled back. `GetSearchStatus` is
//! the guaranteed fallback for a caller to learn the outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::ProviderError;
use crate::session::{MatchedDriver, SearchId, UserId};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionEventKind {
    DriverFound { driver: MatchedDriver },
    SearchTimeout,
    SearchCancelled,
    /// A FOUND session was never confirmed and was purged after the grace
    /// period.
    SearchExpired,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    pub user_id: UserId,
    pub search_id: SearchId,
    #[serde(flatten)]
    pub kind: SessionEventKind,
    pub occurred_at: DateTime<Utc>,
}

impl SessionEvent {
    pub fn new(user_id: UserId, search_id: SearchId, kind: SessionEventKind) -> Self {
        Self {
            user_id,
            search_id,
            kind,
            occurred_at: Utc::now(),
        }
    }
}

/// Outbound boundary to the push/WebSocket collaborator.
#[async_trait]
pub trait EventNotifier: Send + Sync {
    async fn notify(&self, event: SessionEvent) -> Result<(), ProviderError>;
}

/// Default notifier: logs the event and succeeds. Useful for deployments
/// where the push channel is wired up elsewhere and for local runs.
#[derive(Debug, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl EventNotifier for LoggingNotifier {
    async fn notify(&self, event: SessionEvent) -> Result<(), ProviderError> {
        info!(
            user_id = %event.user_id,
            search_id = %event.search_id,
            kind = ?event.kind,
            "session event"
        );
        Ok(())
    }
}
