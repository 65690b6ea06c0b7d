use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::auth::{AuthSession, OAuthConfig};
use crate::error::ConnectorError;
use crate::gmail::models::{HistoryEntry, HistoryList, Profile, Thread, ThreadList};
use crate::pagination::{CursorPage, PageSource};
use crate::rate_limit::{get_with_backoff, RateLimitPolicy};

const GMAIL_API: &str = "https://gmail.googleapis.com/gmail/v1";

/// Page size for thread listing during full enumeration.
pub const THREADS_PAGE_SIZE: u32 = 100;

/// Page size for the change-log listing.
const HISTORY_PAGE_SIZE: u32 = 500;

const HISTORY_TYPES: &str = "messageAdded,messageDeleted,labelAdded,labelRemoved";

/// Typed view of a gmail connector's config blob.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GmailConfig {
    #[serde(default)]
    pub user_email: Option<String>,
    /// Override for the API endpoint (private gateways, tests).
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(flatten)]
    pub oauth: OAuthConfig,
}

impl GmailConfig {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ConnectorError> {
        serde_json::from_value(value.clone())
            .map_err(|e| ConnectorError::Config(format!("gmail config: {e}")))
    }
}

/// Authenticated Gmail API client: every call goes through the auth session
/// (token refresh) and the rate-limit governor.
pub struct GmailClient {
    http: reqwest::Client,
    auth: AuthSession,
    policy: RateLimitPolicy,
    base_url: String,
}

impl GmailClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        let auth = AuthSession::new(http.clone(), "gmail");
        Ok(Self {
            http,
            auth,
            policy: RateLimitPolicy::default(),
            base_url: GMAIL_API.to_string(),
        })
    }

    /// For testing: point the client at a mock server.
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn auth_mut(&mut self) -> &mut AuthSession {
        &mut self.auth
    }

    pub fn auth(&self) -> &AuthSession {
        &self.auth
    }

    async fn get_json<T: DeserializeOwned>(
        &mut self,
        config: &GmailConfig,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ConnectorError> {
        self.auth.ensure_valid(&config.oauth).await?;
        let bearer = self.auth.bearer_header()?;
        let base = config.api_base_url.as_deref().unwrap_or(&self.base_url);
        let url = format!("{base}{path}");

        let response = get_with_backoff(&self.http, &self.policy, "gmail", &url, query, &bearer)
            .await?;
        Ok(response.json::<T>().await?)
    }

    pub async fn get_profile(&mut self, config: &GmailConfig) -> Result<Profile, ConnectorError> {
        self.get_json(config, "/users/me/profile", &[]).await
    }

    pub async fn list_threads(
        &mut self,
        config: &GmailConfig,
        page_token: Option<&str>,
    ) -> Result<ThreadList, ConnectorError> {
        let mut query = vec![
            ("maxResults", THREADS_PAGE_SIZE.to_string()),
            ("includeSpamTrash", "false".to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        self.get_json(config, "/users/me/threads", &query).await
    }

    pub async fn list_history(
        &mut self,
        config: &GmailConfig,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryList, ConnectorError> {
        let mut query = vec![
            ("startHistoryId", start_history_id.to_string()),
            ("historyTypes", HISTORY_TYPES.to_string()),
            ("maxResults", HISTORY_PAGE_SIZE.to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        self.get_json(config, "/users/me/history", &query).await
    }

    pub async fn get_thread(
        &mut self,
        config: &GmailConfig,
        thread_id: &str,
    ) -> Result<Thread, ConnectorError> {
        let path = format!("/users/me/threads/{thread_id}");
        self.get_json(config, &path, &[("format", "full".to_string())])
            .await
    }
}

/// Change-log pages as a cursor source, recording the latest marker seen so
/// the checkpoint can advance past everything this pass consumed.
pub struct HistoryPages<'a> {
    client: &'a mut GmailClient,
    config: &'a GmailConfig,
    start_history_id: String,
    latest_marker: Option<String>,
}

impl<'a> HistoryPages<'a> {
    pub fn new(
        client: &'a mut GmailClient,
        config: &'a GmailConfig,
        start_history_id: &str,
    ) -> Self {
        Self {
            client,
            config,
            start_history_id: start_history_id.to_string(),
            latest_marker: None,
        }
    }

    pub fn latest_marker(&self) -> Option<&str> {
        self.latest_marker.as_deref()
    }
}

#[async_trait]
impl PageSource for HistoryPages<'_> {
    type Item = HistoryEntry;

    async fn fetch(
        &mut self,
        cursor: Option<&str>,
    ) -> Result<CursorPage<HistoryEntry>, ConnectorError> {
        let list = self
            .client
            .list_history(self.config, &self.start_history_id, cursor)
            .await?;
        if let Some(marker) = list.history_id {
            self.latest_marker = Some(marker);
        }
        Ok(CursorPage {
            items: list.history,
            next_cursor: list.next_page_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::drain_pages;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> GmailConfig {
        GmailConfig {
            user_email: Some("owner@example.com".to_string()),
            api_base_url: None,
            oauth: OAuthConfig {
                access_token: Some("token-1".to_string()),
                ..Default::default()
            },
        }
    }

    async fn test_client(server: &MockServer) -> GmailClient {
        let mut client = GmailClient::new()
            .expect("client")
            .with_base_url(&server.uri());
        client
            .auth_mut()
            .authenticate(&test_config().oauth)
            .await
            .expect("authenticate");
        client
    }

    #[tokio::test]
    async fn profile_carries_the_current_marker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/profile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "emailAddress": "owner@example.com",
                "historyId": "4711"
            })))
            .mount(&server)
            .await;

        let mut client = test_client(&server).await;
        let profile = client.get_profile(&test_config()).await.expect("profile");
        assert_eq!(profile.history_id.as_deref(), Some("4711"));
    }

    #[tokio::test]
    async fn list_threads_sends_page_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/threads"))
            .and(query_param("pageToken", "cursor-2"))
            .and(query_param("maxResults", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "threads": [{"id": "t-9", "snippet": "hi", "historyId": "1"}]
            })))
            .mount(&server)
            .await;

        let mut client = test_client(&server).await;
        let list = client
            .list_threads(&test_config(), Some("cursor-2"))
            .await
            .expect("threads");
        assert_eq!(list.threads.len(), 1);
        assert!(list.next_page_token.is_none());
    }

    #[tokio::test]
    async fn expired_marker_surfaces_as_404_download_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/history"))
            .respond_with(ResponseTemplate::new(404).set_body_string("historyId expired"))
            .mount(&server)
            .await;

        let mut client = test_client(&server).await;
        let err = client
            .list_history(&test_config(), "1", None)
            .await
            .expect_err("should fail");
        assert!(matches!(err, ConnectorError::Download { status: 404, .. }));
    }

    #[tokio::test]
    async fn history_pages_track_the_latest_marker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/history"))
            .and(query_param("startHistoryId", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "history": [
                    {"messagesAdded": [{"message": {"id": "m1", "threadId": "t1"}}]}
                ],
                "historyId": "250"
            })))
            .mount(&server)
            .await;

        let mut client = test_client(&server).await;
        let config = test_config();
        let mut pages = HistoryPages::new(&mut client, &config, "100");
        let entries = drain_pages(&mut pages, None, None).await.expect("drain");

        assert_eq!(entries.len(), 1);
        assert_eq!(pages.latest_marker(), Some("250"));
    }
}
