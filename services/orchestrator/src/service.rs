use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use lodestone_bus::{subject_for_source, MessageBus, SyncJob};
use lodestone_db::connector::models::{status, Connector};
use lodestone_db::connector::repositories::ConnectorRepository;

use crate::error::OrchestratorError;

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct SyncStats {
    pub pending: usize,
    pub syncing: usize,
    pub active: usize,
    pub error: usize,
    pub disabled: usize,
    pub due_for_sync: usize,
}

/// Decides who is due and dispatches exactly one job per due connector per
/// cycle. The atomic `pending` claim in the repository is the mutex: a
/// competing orchestrator loses the race at the datastore.
pub struct OrchestratorService<R, B> {
    repo: R,
    bus: B,
}

impl<R, B> OrchestratorService<R, B>
where
    R: ConnectorRepository,
    B: MessageBus,
{
    pub fn new(repo: R, bus: B) -> Self {
        Self { repo, bus }
    }

    /// The main job that runs on the configured interval. Per-connector
    /// failures are logged and skipped; one bad connector never blocks the
    /// rest of the batch. Returns the number of syncs triggered.
    pub async fn check_and_trigger_syncs(&self) -> Result<usize, OrchestratorError> {
        tracing::debug!("checking connectors for sync");

        let connectors = self.repo.get_due_for_sync().await?;
        if connectors.is_empty() {
            tracing::debug!("no connectors due for sync");
            return Ok(0);
        }

        let mut triggered = 0;
        for connector in connectors {
            match self.trigger_sync(&connector).await {
                Ok(session) => {
                    triggered += 1;
                    tracing::info!(
                        connector_id = connector.id,
                        source_type = %connector.source_type,
                        session = %session,
                        "triggered sync"
                    );
                }
                Err(e) => {
                    tracing::error!(connector_id = connector.id, error = %e, "failed to trigger sync");
                }
            }
        }

        tracing::info!(triggered, "sync check complete");
        Ok(triggered)
    }

    /// Manually queue one connector outside the scheduled cycle.
    pub async fn trigger_manual_sync(&self, connector_id: i64) -> Result<Uuid, OrchestratorError> {
        let connector = self
            .repo
            .get_by_id(connector_id)
            .await?
            .ok_or(OrchestratorError::ConnectorNotFound(connector_id))?;

        if connector.status == status::PENDING || connector.status == status::SYNCING {
            return Err(OrchestratorError::trigger(
                connector_id,
                format!("connector is already {}", connector.status),
            ));
        }
        if connector.status == status::DISABLED {
            return Err(OrchestratorError::trigger(
                connector_id,
                "connector is disabled",
            ));
        }

        self.trigger_sync(&connector).await
    }

    /// Counts by status plus the due count, for observability surfaces.
    pub async fn get_sync_stats(&self) -> Result<SyncStats, OrchestratorError> {
        Ok(SyncStats {
            pending: self.repo.get_by_status(status::PENDING).await?.len(),
            syncing: self.repo.get_by_status(status::SYNCING).await?.len(),
            active: self.repo.get_by_status(status::ACTIVE).await?.len(),
            error: self.repo.get_by_status(status::ERROR).await?.len(),
            disabled: self.repo.get_by_status(status::DISABLED).await?.len(),
            due_for_sync: self.repo.get_due_for_sync().await?.len(),
        })
    }

    async fn trigger_sync(&self, connector: &Connector) -> Result<Uuid, OrchestratorError> {
        // Resolve the subject before claiming so an unroutable connector is
        // never left stuck in pending.
        let subject = subject_for_source(&connector.source_type).ok_or_else(|| {
            OrchestratorError::trigger(
                connector.id,
                format!("unknown source type: {}", connector.source_type),
            )
        })?;

        let chunking_session = Uuid::new_v4();
        let claimed = self
            .repo
            .claim_for_sync(
                connector.id,
                &format!("Queued for sync (session: {chunking_session})"),
            )
            .await?
            .ok_or_else(|| {
                OrchestratorError::trigger(connector.id, "claim lost: connector no longer eligible")
            })?;

        let job = SyncJob {
            connector_id: claimed.id,
            source_type: claimed.source_type.clone(),
            user_id: claimed.user_id,
            scope: claimed.scope.clone(),
            scope_id: claimed.scope_id,
            config: claimed.config.clone(),
            state: claimed.state.clone(),
            chunking_session,
            triggered_at: Utc::now(),
        };
        let payload = serde_json::to_vec(&job)
            .map_err(|e| OrchestratorError::trigger(connector.id, format!("serialize job: {e}")))?;

        self.bus.publish(subject, &payload).await.map_err(|e| {
            OrchestratorError::trigger(connector.id, format!("bus publish failed: {e}"))
        })?;

        Ok(chunking_session)
    }
}
