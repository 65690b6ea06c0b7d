use thiserror::Error;

/// Dispatch failures surfaced to manual-trigger callers and logged per
/// connector inside the scheduled cycle; they never crash the loop.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("connector {0} not found")]
    ConnectorNotFound(i64),

    #[error("failed to trigger sync for connector {connector_id}: {reason}")]
    SyncTrigger { connector_id: i64, reason: String },

    #[error(transparent)]
    Repository(#[from] lodestone_common::error::LodestoneError),
}

impl OrchestratorError {
    pub fn trigger(connector_id: i64, reason: impl Into<String>) -> Self {
        Self::SyncTrigger {
            connector_id,
            reason: reason.into(),
        }
    }
}
