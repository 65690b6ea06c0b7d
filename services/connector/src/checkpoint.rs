use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

/// Which sync strategy the next run uses. A checkpoint is always in exactly
/// one mode; switching from `Incremental` back to `FullEnumeration` is only
/// valid when the source reports the stored marker expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CheckpointMode {
    /// Paging through every item from scratch.
    FullEnumeration {
        #[serde(default)]
        page_cursor: Option<String>,
        #[serde(default)]
        has_more: bool,
        /// Change-marker captured when the pass started. Promoted to
        /// `Incremental` only once the pass completes, so a truncated run
        /// resumes from its exact page cursor instead of restarting.
        #[serde(default)]
        captured_marker: Option<String>,
    },
    /// Following the source's change log from a stored marker.
    Incremental { marker: String },
}

impl Default for CheckpointMode {
    fn default() -> Self {
        Self::FullEnumeration {
            page_cursor: None,
            has_more: false,
            captured_marker: None,
        }
    }
}

/// Durable per-connector cursor state, persisted as the connector's `state`
/// blob at the end of every run (or sooner, for long runs).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    #[serde(flatten)]
    pub mode: CheckpointMode,
    /// Item ids already materialized in the current run. Kept across a
    /// truncated full enumeration so the resumed pass does not re-download.
    #[serde(default)]
    pub materialized: BTreeSet<String>,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub last_sync_start: Option<DateTime<Utc>>,
}

impl SyncCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deserialize from a connector's state blob. Absent or null state means
    /// a first sync: a fresh full-enumeration checkpoint.
    pub fn from_state(state: Option<&serde_json::Value>) -> Result<Self, ConnectorError> {
        match state {
            None | Some(serde_json::Value::Null) => Ok(Self::new()),
            Some(value) if value.as_object().is_some_and(|o| o.is_empty()) => Ok(Self::new()),
            Some(value) => Ok(serde_json::from_value(value.clone())?),
        }
    }

    pub fn to_state(&self) -> Result<serde_json::Value, ConnectorError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Record an item as materialized for this run. Returns `false` if the
    /// item was already handled (skip it).
    pub fn mark_materialized(&mut self, source_id: &str) -> bool {
        self.materialized.insert(source_id.to_string())
    }

    /// Whether a truncated full enumeration still has pages to resume.
    pub fn has_more(&self) -> bool {
        matches!(self.mode, CheckpointMode::FullEnumeration { has_more: true, .. })
    }
}
