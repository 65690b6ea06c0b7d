use chrono::{DateTime, Utc};
use serde::Serialize;

use lodestone_bus::SyncJob;
use lodestone_db::connector::models::status;
use lodestone_db::connector::repositories::ConnectorRepository;

use crate::checkpoint::SyncCheckpoint;
use crate::error::ConnectorError;
use crate::permissions::ExternalAccess;
use crate::provider::{create_provider, DownloadedFile, Provider, SyncItem};
use crate::storage::ObjectStore;

/// Sidecar stored next to each document so the extraction pipeline sees the
/// item's own access scope and provenance, not just its bytes.
#[derive(Serialize)]
struct DocumentMeta<'a> {
    source_id: &'a str,
    name: &'a str,
    mime_type: &'a str,
    content_hash: &'a str,
    modified_at: DateTime<Utc>,
    access: &'a ExternalAccess,
    original_url: Option<&'a str>,
}

impl<'a> DocumentMeta<'a> {
    fn for_file(file: &'a DownloadedFile) -> Self {
        Self {
            source_id: &file.source_id,
            name: &file.name,
            mime_type: &file.mime_type,
            content_hash: &file.content_hash,
            modified_at: file.modified_at,
            access: &file.access,
            original_url: file.original_url.as_deref(),
        }
    }
}

#[derive(Debug)]
pub struct SyncOutcome {
    pub source_type: String,
    pub stored: usize,
    pub deleted: usize,
    pub errors: usize,
}

/// Executes one dispatched sync job end to end: claims the `syncing` status,
/// runs the provider, materializes emitted items into the object store, and
/// persists the advanced checkpoint plus a terminal status back to the
/// connector row.
pub struct SyncRunner<R, S> {
    repo: R,
    store: S,
    bucket: String,
}

impl<R, S> SyncRunner<R, S>
where
    R: ConnectorRepository,
    S: ObjectStore,
{
    pub fn new(repo: R, store: S, bucket: impl Into<String>) -> Self {
        Self {
            repo,
            store,
            bucket: bucket.into(),
        }
    }

    pub async fn handle_job(&self, job: &SyncJob) -> Result<SyncOutcome, ConnectorError> {
        let Some(_connector) = self.repo.mark_syncing(job.connector_id).await? else {
            // Redelivered or stale message: someone else owns this run.
            tracing::info!(
                connector_id = job.connector_id,
                "connector not pending, skipping job"
            );
            return Ok(SyncOutcome {
                source_type: job.source_type.clone(),
                stored: 0,
                deleted: 0,
                errors: 0,
            });
        };

        let mut provider = match create_provider(&job.source_type) {
            Ok(p) => p,
            Err(e) => {
                self.finish_error(job, &SyncCheckpoint::new(), &e).await?;
                return Err(e);
            }
        };

        let mut checkpoint = match SyncCheckpoint::from_state(job.state.as_ref()) {
            Ok(cp) => cp,
            Err(e) => {
                tracing::warn!(
                    connector_id = job.connector_id,
                    error = %e,
                    "unreadable checkpoint state, starting fresh"
                );
                provider.create_checkpoint()
            }
        };

        match self.run(provider.as_mut(), job, &mut checkpoint).await {
            Ok((stored, deleted)) => {
                let message = format!(
                    "synced {stored} item(s), {} error(s) (session: {})",
                    checkpoint.error_count, job.chunking_session
                );
                self.repo
                    .finish_sync(
                        job.connector_id,
                        &checkpoint.to_state()?,
                        status::ACTIVE,
                        &message,
                    )
                    .await?;
                Ok(SyncOutcome {
                    source_type: job.source_type.clone(),
                    stored,
                    deleted,
                    errors: checkpoint.error_count as usize,
                })
            }
            Err(e) => {
                self.finish_error(job, &checkpoint, &e).await?;
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        provider: &mut dyn Provider,
        job: &SyncJob,
        checkpoint: &mut SyncCheckpoint,
    ) -> Result<(usize, usize), ConnectorError> {
        let items = provider.sync(&job.config, checkpoint).await?;

        let mut stored = 0;
        let mut deleted = 0;
        for item in items {
            match item {
                SyncItem::Downloaded(file) => {
                    let key = object_key(job.connector_id, &file.source_id);
                    let etag = self
                        .store
                        .put(&self.bucket, &key, &file.content, &file.mime_type)
                        .await?;

                    let meta = serde_json::to_vec(&DocumentMeta::for_file(&file))?;
                    self.store
                        .put(&self.bucket, &meta_key(&key), &meta, "application/json")
                        .await?;

                    tracing::debug!(key, etag, name = %file.name, "stored document");
                    stored += 1;
                }
                SyncItem::Deleted(deleted_file) => {
                    let key = object_key(job.connector_id, &deleted_file.source_id);
                    self.store.remove(&self.bucket, &key).await?;
                    self.store.remove(&self.bucket, &meta_key(&key)).await?;
                    deleted += 1;
                }
            }
        }
        Ok((stored, deleted))
    }

    async fn finish_error(
        &self,
        job: &SyncJob,
        checkpoint: &SyncCheckpoint,
        error: &ConnectorError,
    ) -> Result<(), ConnectorError> {
        let state = checkpoint.to_state()?;
        self.repo
            .finish_sync(
                job.connector_id,
                &state,
                status::ERROR,
                &format!("sync failed: {error}"),
            )
            .await?;
        Ok(())
    }
}

/// Deterministic object key per connector and source item, so deletes can
/// address what upserts wrote.
fn object_key(connector_id: i64, source_id: &str) -> String {
    format!("connectors/{connector_id}/{source_id}.md")
}

fn meta_key(object_key: &str) -> String {
    format!("{object_key}.meta.json")
}
