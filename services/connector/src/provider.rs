use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::checkpoint::SyncCheckpoint;
use crate::error::ConnectorError;
use crate::gmail::GmailProvider;
use crate::permissions::ExternalAccess;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Create,
    Update,
}

/// Reference metadata for one changed item, enough to download it later.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemMetadata {
    pub source_id: String,
    pub name: String,
    pub mime_type: String,
    pub content_hash: Option<String>,
}

/// One detected change. Upserts carry metadata for the download step;
/// deletes carry only the item identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum FileChange {
    Upsert {
        action: ChangeAction,
        item: ItemMetadata,
    },
    Delete {
        source_id: String,
    },
}

/// A fully fetched item, normalized for storage.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedFile {
    pub source_id: String,
    pub name: String,
    pub content: Vec<u8>,
    pub mime_type: String,
    pub content_hash: String,
    pub modified_at: DateTime<Utc>,
    pub access: ExternalAccess,
    pub original_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeletedFile {
    pub source_id: String,
}

/// What a sync run emits, consumed immediately by materialization.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncItem {
    Downloaded(DownloadedFile),
    Deleted(DeletedFile),
}

/// The contract every source-specific provider implements.
///
/// `config` is the connector's opaque configuration snapshot; each provider
/// deserializes it into its own typed config struct. The checkpoint is
/// advanced in place and persisted by the caller after the run.
#[async_trait]
pub trait Provider: Send {
    fn source_type(&self) -> &'static str;

    /// Load credentials and refresh them if needed.
    async fn authenticate(&mut self, config: &serde_json::Value) -> Result<(), ConnectorError>;

    /// Cheap connectivity probe for admin surfaces.
    async fn check_connection(&mut self, config: &serde_json::Value) -> bool;

    /// Detect changes since the checkpoint: full enumeration when no usable
    /// change-marker exists, incremental detection otherwise.
    async fn get_changes(
        &mut self,
        config: &serde_json::Value,
        checkpoint: &mut SyncCheckpoint,
    ) -> Result<Vec<FileChange>, ConnectorError>;

    /// Fetch one changed item and normalize it for storage.
    async fn download_item(
        &mut self,
        item: &ItemMetadata,
        config: &serde_json::Value,
    ) -> Result<DownloadedFile, ConnectorError>;

    /// The top-level per-run loop: authenticate, detect changes, download
    /// each new upsert (tolerating per-item failures), pass deletes through.
    async fn sync(
        &mut self,
        config: &serde_json::Value,
        checkpoint: &mut SyncCheckpoint,
    ) -> Result<Vec<SyncItem>, ConnectorError>;

    fn create_checkpoint(&self) -> SyncCheckpoint {
        SyncCheckpoint::new()
    }
}

/// Closed registry of provider implementations, selected by source-type tag
/// at dispatch time.
pub fn create_provider(source_type: &str) -> Result<Box<dyn Provider>, ConnectorError> {
    match source_type {
        "gmail" => Ok(Box::new(GmailProvider::new()?)),
        other => Err(ConnectorError::UnsupportedSource(other.to_string())),
    }
}
