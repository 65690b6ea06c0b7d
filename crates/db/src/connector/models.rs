use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connector lifecycle statuses.
///
/// Per sync attempt the transitions are monotonic:
/// `active`/`error` → `pending` (claimed) → `syncing` → `active`|`error`.
/// `disabled` connectors are never claimed.
pub mod status {
    pub const PENDING: &str = "pending";
    pub const SYNCING: &str = "syncing";
    pub const ACTIVE: &str = "active";
    pub const ERROR: &str = "error";
    pub const DISABLED: &str = "disabled";

    pub const ALL: &[&str] = &[PENDING, SYNCING, ACTIVE, ERROR, DISABLED];
}

/// A configured binding to one external content source.
///
/// `config` and `state` are opaque to the datastore layer: `config` is the
/// provider configuration, `state` the provider's serialized checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connector {
    pub id: i64,
    pub source_type: String,
    pub user_id: i64,
    pub scope: String,
    pub scope_id: i64,
    pub config: serde_json::Value,
    pub state: Option<serde_json::Value>,
    pub status: String,
    pub status_message: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub refresh_interval_mins: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
