use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One sync dispatch, published by the orchestrator and consumed by a
/// connector worker. Immutable after publish; `chunking_session` is the
/// idempotency key for the whole downstream pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub connector_id: i64,
    #[serde(rename = "type")]
    pub source_type: String,
    pub user_id: i64,
    pub scope: String,
    pub scope_id: i64,
    pub config: serde_json::Value,
    pub state: Option<serde_json::Value>,
    pub chunking_session: Uuid,
    pub triggered_at: DateTime<Utc>,
}

/// Subjects for every dispatchable source type, declared at bus connect.
pub const SYNC_SUBJECTS: &[&str] = &[
    "connector.sync.web",
    "connector.sync.file",
    "connector.sync.onedrive",
    "connector.sync.google_drive",
    "connector.sync.teams",
    "connector.sync.gmail",
];

/// Map a connector source type to its dispatch subject.
/// Returns `None` for source types no worker consumes.
pub fn subject_for_source(source_type: &str) -> Option<&'static str> {
    SYNC_SUBJECTS
        .iter()
        .copied()
        .find(|s| s.rsplit('.').next() == Some(source_type))
}
