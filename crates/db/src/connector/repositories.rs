use async_trait::async_trait;

use crate::connector::models::Connector;
use lodestone_common::error::LodestoneResult;

#[async_trait]
pub trait ConnectorRepository: Send + Sync {
    /// Fetch one connector by id.
    async fn get_by_id(&self, id: i64) -> LodestoneResult<Option<Connector>>;

    /// Connectors due for sync: status not in (pending, syncing, disabled)
    /// and never synced or past their refresh interval, stalest first.
    async fn get_due_for_sync(&self) -> LodestoneResult<Vec<Connector>>;

    /// All connectors currently in the given status.
    async fn get_by_status(&self, status: &str) -> LodestoneResult<Vec<Connector>>;

    /// Atomically claim a connector for dispatch by setting it `pending`.
    /// The status predicate in the update is the mutex: returns `None` if the
    /// connector is already pending/syncing, disabled, or missing.
    async fn claim_for_sync(
        &self,
        id: i64,
        status_message: &str,
    ) -> LodestoneResult<Option<Connector>>;

    /// Worker-side transition `pending` → `syncing`. Returns `None` if the
    /// connector is no longer pending (e.g. another worker won the message).
    async fn mark_syncing(&self, id: i64) -> LodestoneResult<Option<Connector>>;

    /// Persist a finished run: advanced state blob, terminal status, and a
    /// human-readable message. Stamps `last_sync_at` so the scheduler's due
    /// query picks the connector up again after its refresh interval.
    async fn finish_sync(
        &self,
        id: i64,
        state: &serde_json::Value,
        status: &str,
        status_message: &str,
    ) -> LodestoneResult<Connector>;
}
