use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;

use crate::checkpoint::{CheckpointMode, SyncCheckpoint};
use crate::error::ConnectorError;
use crate::gmail::client::{GmailClient, GmailConfig, HistoryPages};
use crate::gmail::markdown::{message_header, slugify, thread_to_markdown};
use crate::pagination::drain_pages;
use crate::permissions::ExternalAccess;
use crate::provider::{
    ChangeAction, DeletedFile, DownloadedFile, FileChange, ItemMetadata, Provider, SyncItem,
};
use crate::storage::content_digest;

/// Maximum threads to process per sync run. A truncated run keeps its page
/// cursor in the checkpoint and resumes from it on the next cycle.
const MAX_THREADS_PER_SYNC: usize = 5000;

const SLUG_MAX_LEN: usize = 80;

/// Syncs mail threads: full enumeration on first contact, change-log
/// (history) based incremental detection afterwards. Each thread becomes one
/// markdown document, visible to the mailbox owner only.
pub struct GmailProvider {
    client: GmailClient,
    max_threads_per_sync: usize,
}

impl GmailProvider {
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: GmailClient::new()?,
            max_threads_per_sync: MAX_THREADS_PER_SYNC,
        })
    }

    #[cfg(test)]
    pub fn with_client(client: GmailClient) -> Self {
        Self {
            client,
            max_threads_per_sync: MAX_THREADS_PER_SYNC,
        }
    }

    #[cfg(test)]
    pub fn with_thread_cap(mut self, cap: usize) -> Self {
        self.max_threads_per_sync = cap;
        self
    }

    /// List every thread from the checkpoint's page cursor onwards.
    ///
    /// The mailbox's current marker is captured before the first page so
    /// changes landing during the pass are not lost; it is promoted to
    /// incremental mode only when the pass completes.
    async fn enumerate_all(
        &mut self,
        config: &GmailConfig,
        checkpoint: &mut SyncCheckpoint,
    ) -> Result<Vec<FileChange>, ConnectorError> {
        let (mut page_cursor, mut captured_marker) = match &checkpoint.mode {
            CheckpointMode::FullEnumeration {
                page_cursor,
                captured_marker,
                ..
            } => (page_cursor.clone(), captured_marker.clone()),
            CheckpointMode::Incremental { .. } => (None, None),
        };

        if captured_marker.is_none() {
            let profile = self.client.get_profile(config).await?;
            captured_marker = profile.history_id;
        }

        let mut changes = Vec::new();
        let mut processed = 0usize;

        loop {
            if processed >= self.max_threads_per_sync {
                tracing::info!(
                    processed,
                    "thread cap reached, truncating run for resumption"
                );
                checkpoint.mode = CheckpointMode::FullEnumeration {
                    page_cursor,
                    has_more: true,
                    captured_marker,
                };
                return Ok(changes);
            }

            let page = self.client.list_threads(config, page_cursor.as_deref()).await?;
            for stub in page.threads {
                let slug = slugify(&stub.snippet, SLUG_MAX_LEN);
                changes.push(FileChange::Upsert {
                    action: ChangeAction::Create,
                    item: ItemMetadata {
                        source_id: stub.id.clone(),
                        name: if slug.is_empty() { stub.id } else { slug },
                        mime_type: "text/markdown".to_string(),
                        content_hash: stub.history_id,
                    },
                });
                processed += 1;
            }

            page_cursor = page.next_page_token;
            match page_cursor {
                Some(_) => {
                    checkpoint.mode = CheckpointMode::FullEnumeration {
                        page_cursor: page_cursor.clone(),
                        has_more: true,
                        captured_marker: captured_marker.clone(),
                    };
                }
                None => {
                    checkpoint.mode = match captured_marker {
                        Some(marker) => CheckpointMode::Incremental { marker },
                        None => CheckpointMode::default(),
                    };
                    return Ok(changes);
                }
            }
        }
    }

    /// Page the change log since `marker`, collecting the set of distinct
    /// threads touched by any add/remove/label event.
    async fn history_changes(
        &mut self,
        config: &GmailConfig,
        checkpoint: &mut SyncCheckpoint,
        marker: &str,
    ) -> Result<Vec<FileChange>, ConnectorError> {
        let mut pages = HistoryPages::new(&mut self.client, config, marker);
        let entries = drain_pages(&mut pages, None, None).await?;
        let latest_marker = pages.latest_marker().map(str::to_owned);

        let mut touched: BTreeSet<String> = BTreeSet::new();
        for entry in &entries {
            touched.extend(entry.touched_thread_ids().map(str::to_owned));
        }

        if let Some(marker) = latest_marker {
            checkpoint.mode = CheckpointMode::Incremental { marker };
        }

        Ok(touched
            .into_iter()
            .map(|thread_id| FileChange::Upsert {
                action: ChangeAction::Update,
                item: ItemMetadata {
                    source_id: thread_id.clone(),
                    name: thread_id,
                    mime_type: "text/markdown".to_string(),
                    content_hash: None,
                },
            })
            .collect())
    }
}

#[async_trait]
impl Provider for GmailProvider {
    fn source_type(&self) -> &'static str {
        "gmail"
    }

    async fn authenticate(&mut self, config: &serde_json::Value) -> Result<(), ConnectorError> {
        let config = GmailConfig::from_value(config)?;
        self.client.auth_mut().authenticate(&config.oauth).await
    }

    async fn check_connection(&mut self, config: &serde_json::Value) -> bool {
        let Ok(config) = GmailConfig::from_value(config) else {
            return false;
        };
        if self.client.auth().access_token().is_none() {
            return false;
        }
        match self.client.get_profile(&config).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "gmail connection check failed");
                false
            }
        }
    }

    async fn get_changes(
        &mut self,
        config: &serde_json::Value,
        checkpoint: &mut SyncCheckpoint,
    ) -> Result<Vec<FileChange>, ConnectorError> {
        let config = GmailConfig::from_value(config)?;

        match checkpoint.mode.clone() {
            CheckpointMode::Incremental { marker } => {
                match self.history_changes(&config, checkpoint, &marker).await {
                    Ok(changes) => Ok(changes),
                    Err(ConnectorError::Download { status: 404, .. }) => {
                        tracing::warn!("history marker expired, forcing full resync");
                        checkpoint.mode = CheckpointMode::default();
                        self.enumerate_all(&config, checkpoint).await
                    }
                    Err(e) => Err(e),
                }
            }
            CheckpointMode::FullEnumeration { .. } => {
                self.enumerate_all(&config, checkpoint).await
            }
        }
    }

    async fn download_item(
        &mut self,
        item: &ItemMetadata,
        config: &serde_json::Value,
    ) -> Result<DownloadedFile, ConnectorError> {
        let config = GmailConfig::from_value(config)?;
        let thread = self.client.get_thread(&config, &item.source_id).await?;
        let markdown = thread_to_markdown(&thread);
        let content = markdown.into_bytes();

        let subject = thread
            .messages
            .first()
            .and_then(|m| message_header(m, "Subject"))
            .unwrap_or_default();
        let slug = slugify(subject, SLUG_MAX_LEN);
        let name = if slug.is_empty() {
            format!("{}.md", item.source_id)
        } else {
            format!("{slug}.md")
        };

        // Mail is private to the mailbox owner, regardless of how broadly
        // the connector itself is scoped.
        let access = match &config.user_email {
            Some(email) => ExternalAccess::for_user(email.clone()),
            None => ExternalAccess::empty(),
        };

        Ok(DownloadedFile {
            source_id: item.source_id.clone(),
            name,
            content_hash: content_digest(&content),
            content,
            mime_type: "text/markdown".to_string(),
            modified_at: Utc::now(),
            access,
            original_url: Some(format!(
                "https://mail.google.com/mail/u/0/#inbox/{}",
                item.source_id
            )),
        })
    }

    async fn sync(
        &mut self,
        config: &serde_json::Value,
        checkpoint: &mut SyncCheckpoint,
    ) -> Result<Vec<SyncItem>, ConnectorError> {
        checkpoint.last_sync_start = Some(Utc::now());

        if self.client.auth().access_token().is_none() {
            self.authenticate(config).await?;
        }

        let changes = self.get_changes(config, checkpoint).await?;
        let mut items = Vec::new();

        for change in changes {
            match change {
                FileChange::Delete { source_id } => {
                    items.push(SyncItem::Deleted(DeletedFile { source_id }));
                }
                FileChange::Upsert { item, .. } => {
                    if !checkpoint.mark_materialized(&item.source_id) {
                        continue;
                    }
                    match self.download_item(&item, config).await {
                        Ok(file) => items.push(SyncItem::Downloaded(file)),
                        Err(e @ ConnectorError::Download { .. }) => {
                            tracing::error!(
                                thread_id = %item.source_id,
                                error = %e,
                                "failed to download thread"
                            );
                            checkpoint.error_count += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        // The de-dup set is per run; it only survives a truncated pass so
        // the resumed pass skips what this one already materialized.
        if !checkpoint.has_more() {
            checkpoint.materialized.clear();
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::OAuthConfig;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_value() -> serde_json::Value {
        serde_json::json!({
            "user_email": "owner@example.com",
            "access_token": "token-1"
        })
    }

    async fn provider_for(server: &MockServer) -> GmailProvider {
        let mut client = GmailClient::new()
            .expect("client")
            .with_base_url(&server.uri());
        client
            .auth_mut()
            .authenticate(&OAuthConfig {
                access_token: Some("token-1".to_string()),
                ..Default::default()
            })
            .await
            .expect("authenticate");
        GmailProvider::with_client(client)
    }

    fn mount_profile(server: &MockServer, history_id: &str) -> Mock {
        Mock::given(method("GET"))
            .and(path("/users/me/profile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "emailAddress": "owner@example.com",
                "historyId": history_id
            })))
    }

    fn thread_body(id: &str, subject: &str, body_text: &str) -> serde_json::Value {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;
        serde_json::json!({
            "id": id,
            "messages": [{
                "id": format!("{id}-m1"),
                "payload": {
                    "mimeType": "text/plain",
                    "headers": [
                        {"name": "Subject", "value": subject},
                        {"name": "From", "value": "alice@example.com"}
                    ],
                    "body": {"data": URL_SAFE_NO_PAD.encode(body_text), "size": body_text.len()}
                }
            }]
        })
    }

    #[tokio::test]
    async fn first_sync_enumerates_and_stores_marker() {
        let server = MockServer::start().await;
        mount_profile(&server, "900").mount(&server).await;
        Mock::given(method("GET"))
            .and(path("/users/me/threads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "threads": [
                    {"id": "t1", "snippet": "Budget review", "historyId": "880"},
                    {"id": "t2", "snippet": "", "historyId": "890"}
                ]
            })))
            .mount(&server)
            .await;

        let mut provider = provider_for(&server).await;
        let mut checkpoint = SyncCheckpoint::new();
        let changes = provider
            .get_changes(&config_value(), &mut checkpoint)
            .await
            .expect("changes");

        assert_eq!(changes.len(), 2);
        match &changes[0] {
            FileChange::Upsert { action, item } => {
                assert_eq!(*action, ChangeAction::Create);
                assert_eq!(item.source_id, "t1");
                assert_eq!(item.name, "budget-review");
            }
            other => panic!("expected upsert, got: {other:?}"),
        }
        // Empty snippet falls back to the raw thread id
        match &changes[1] {
            FileChange::Upsert { item, .. } => assert_eq!(item.name, "t2"),
            other => panic!("expected upsert, got: {other:?}"),
        }

        // Completed pass promotes the captured marker to incremental mode
        assert_eq!(
            checkpoint.mode,
            CheckpointMode::Incremental {
                marker: "900".to_string()
            }
        );
    }

    #[tokio::test]
    async fn second_sync_uses_incremental_detection_only() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/history"))
            .and(query_param("startHistoryId", "900"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "history": [
                    {"messagesAdded": [{"message": {"id": "m1", "threadId": "t7"}}]},
                    {"labelsAdded": [{"message": {"id": "m2", "threadId": "t7"}}]},
                    {"messagesDeleted": [{"message": {"id": "m3", "threadId": "t8"}}]}
                ],
                "historyId": "950"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut provider = provider_for(&server).await;
        let mut checkpoint = SyncCheckpoint::new();
        checkpoint.mode = CheckpointMode::Incremental {
            marker: "900".to_string(),
        };

        let changes = provider
            .get_changes(&config_value(), &mut checkpoint)
            .await
            .expect("changes");

        // t7 deduplicated across its two events
        assert_eq!(changes.len(), 2);
        let ids: Vec<&str> = changes
            .iter()
            .map(|c| match c {
                FileChange::Upsert { item, .. } => item.source_id.as_str(),
                FileChange::Delete { source_id } => source_id.as_str(),
            })
            .collect();
        assert_eq!(ids, vec!["t7", "t8"]);

        assert_eq!(
            checkpoint.mode,
            CheckpointMode::Incremental {
                marker: "950".to_string()
            }
        );
    }

    #[tokio::test]
    async fn expired_marker_falls_back_to_full_enumeration() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/history"))
            .respond_with(ResponseTemplate::new(404).set_body_string("historyId expired"))
            .mount(&server)
            .await;
        mount_profile(&server, "2000").mount(&server).await;
        Mock::given(method("GET"))
            .and(path("/users/me/threads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "threads": [{"id": "t1", "snippet": "hello", "historyId": "1"}]
            })))
            .mount(&server)
            .await;

        let mut provider = provider_for(&server).await;
        let mut checkpoint = SyncCheckpoint::new();
        checkpoint.mode = CheckpointMode::Incremental {
            marker: "1".to_string(),
        };

        let changes = provider
            .get_changes(&config_value(), &mut checkpoint)
            .await
            .expect("must not propagate the 404");

        assert!(!changes.is_empty());
        assert_eq!(
            checkpoint.mode,
            CheckpointMode::Incremental {
                marker: "2000".to_string()
            }
        );
    }

    #[tokio::test]
    async fn thread_cap_truncates_and_keeps_cursor() {
        let server = MockServer::start().await;
        mount_profile(&server, "500").mount(&server).await;
        Mock::given(method("GET"))
            .and(path("/users/me/threads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "threads": [
                    {"id": "t1", "snippet": "one", "historyId": "1"},
                    {"id": "t2", "snippet": "two", "historyId": "2"}
                ],
                "nextPageToken": "page-2"
            })))
            .mount(&server)
            .await;

        let mut provider = provider_for(&server).await.with_thread_cap(2);
        let mut checkpoint = SyncCheckpoint::new();
        let changes = provider
            .get_changes(&config_value(), &mut checkpoint)
            .await
            .expect("changes");

        assert_eq!(changes.len(), 2);
        assert_eq!(
            checkpoint.mode,
            CheckpointMode::FullEnumeration {
                page_cursor: Some("page-2".to_string()),
                has_more: true,
                captured_marker: Some("500".to_string()),
            }
        );
        assert!(checkpoint.has_more());
    }

    #[tokio::test]
    async fn resumed_pass_starts_from_stored_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/threads"))
            .and(query_param("pageToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "threads": [{"id": "t3", "snippet": "three", "historyId": "3"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut provider = provider_for(&server).await;
        let mut checkpoint = SyncCheckpoint::new();
        checkpoint.mode = CheckpointMode::FullEnumeration {
            page_cursor: Some("page-2".to_string()),
            has_more: true,
            captured_marker: Some("500".to_string()),
        };

        let changes = provider
            .get_changes(&config_value(), &mut checkpoint)
            .await
            .expect("changes");

        assert_eq!(changes.len(), 1);
        // marker captured before truncation is promoted, not re-fetched
        assert_eq!(
            checkpoint.mode,
            CheckpointMode::Incremental {
                marker: "500".to_string()
            }
        );
    }

    #[tokio::test]
    async fn download_converts_thread_and_derives_owner_access() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/threads/t1"))
            .and(query_param("format", "full"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(thread_body("t1", "Budget review", "numbers inside")),
            )
            .mount(&server)
            .await;

        let mut provider = provider_for(&server).await;
        let item = ItemMetadata {
            source_id: "t1".to_string(),
            name: "t1".to_string(),
            mime_type: "text/markdown".to_string(),
            content_hash: None,
        };

        let file = provider
            .download_item(&item, &config_value())
            .await
            .expect("download");

        assert_eq!(file.name, "budget-review.md");
        assert_eq!(file.mime_type, "text/markdown");
        let text = String::from_utf8(file.content.clone()).expect("utf8");
        assert!(text.starts_with("# Budget review"));
        assert!(text.contains("numbers inside"));
        assert_eq!(file.content_hash, content_digest(&file.content));
        assert_eq!(file.access, ExternalAccess::for_user("owner@example.com"));
        assert_eq!(
            file.original_url.as_deref(),
            Some("https://mail.google.com/mail/u/0/#inbox/t1")
        );
    }

    #[tokio::test]
    async fn sync_tolerates_per_item_download_failures() {
        let server = MockServer::start().await;
        mount_profile(&server, "100").mount(&server).await;
        Mock::given(method("GET"))
            .and(path("/users/me/threads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "threads": [
                    {"id": "t1", "snippet": "good", "historyId": "1"},
                    {"id": "t2", "snippet": "gone", "historyId": "2"}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/me/threads/t1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(thread_body("t1", "good", "body")),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/me/threads/t2"))
            .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
            .mount(&server)
            .await;

        let mut provider = provider_for(&server).await;
        let mut checkpoint = SyncCheckpoint::new();
        let items = provider
            .sync(&config_value(), &mut checkpoint)
            .await
            .expect("run survives the bad item");

        assert_eq!(items.len(), 1);
        assert_eq!(checkpoint.error_count, 1);
    }

    #[tokio::test]
    async fn sync_skips_items_already_materialized_this_run() {
        let server = MockServer::start().await;
        mount_profile(&server, "100").mount(&server).await;
        Mock::given(method("GET"))
            .and(path("/users/me/threads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "threads": [{"id": "t1", "snippet": "seen", "historyId": "1"}]
            })))
            .mount(&server)
            .await;

        let mut provider = provider_for(&server).await.with_thread_cap(1);
        let mut checkpoint = SyncCheckpoint::new();
        checkpoint.mark_materialized("t1");

        let items = provider
            .sync(&config_value(), &mut checkpoint)
            .await
            .expect("sync");
        assert!(items.is_empty());
    }
}
