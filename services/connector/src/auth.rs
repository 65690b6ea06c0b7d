//! OAuth2 bearer-token session shared by providers that authenticate
//! against a token endpoint with a stored refresh token.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::error::ConnectorError;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Refresh when the token expires within this margin.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Credential material carried in a connector's config blob.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OAuthConfig {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

/// Holds the live bearer credential for one provider and refreshes it in
/// place. Created once per provider instance; only the config's refresh
/// credential ever replaces it wholesale.
pub struct AuthSession {
    http: reqwest::Client,
    provider: &'static str,
    token_url: String,
    access_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl AuthSession {
    pub fn new(http: reqwest::Client, provider: &'static str) -> Self {
        Self {
            http,
            provider,
            token_url: TOKEN_URL.to_string(),
            access_token: None,
            expires_at: None,
        }
    }

    /// For testing: point token refresh at a mock endpoint.
    #[cfg(test)]
    pub fn with_token_url(mut self, url: &str) -> Self {
        self.token_url = url.to_string();
        self
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => at <= Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS),
            None => false,
        }
    }

    /// Load credentials from config, refreshing immediately if the supplied
    /// expiry is already within the safety margin.
    pub async fn authenticate(&mut self, config: &OAuthConfig) -> Result<(), ConnectorError> {
        let token = config
            .access_token
            .as_ref()
            .ok_or_else(|| ConnectorError::auth(self.provider, "missing access_token in config"))?;

        self.access_token = Some(token.clone());
        self.expires_at = config.token_expires_at;

        if self.is_expired() {
            self.refresh(config).await?;
        }
        Ok(())
    }

    /// Exchange the refresh token for a new access token.
    pub async fn refresh(&mut self, config: &OAuthConfig) -> Result<(), ConnectorError> {
        let (Some(refresh_token), Some(client_id), Some(client_secret)) = (
            config.refresh_token.as_ref(),
            config.client_id.as_ref(),
            config.client_secret.as_ref(),
        ) else {
            return Err(ConnectorError::auth(
                self.provider,
                "missing refresh_token, client_id, or client_secret for token refresh",
            ));
        };

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await
            .map_err(|e| {
                ConnectorError::auth(self.provider, format!("token refresh request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::auth(
                self.provider,
                format!("token refresh rejected: {body}"),
            ));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            ConnectorError::auth(self.provider, format!("bad token response: {e}"))
        })?;

        self.access_token = Some(token.access_token);
        self.expires_at = Some(Utc::now() + Duration::seconds(token.expires_in));
        tracing::info!(provider = self.provider, "refreshed access token");
        Ok(())
    }

    /// The call path used before every outbound request: refresh if near
    /// expiry, then hand back the current credential.
    pub async fn ensure_valid(&mut self, config: &OAuthConfig) -> Result<&str, ConnectorError> {
        if self.is_expired() {
            self.refresh(config).await?;
        }
        self.access_token
            .as_deref()
            .ok_or_else(|| ConnectorError::auth(self.provider, "no access token available"))
    }

    /// `Authorization` header value. Fails before any successful
    /// authentication.
    pub fn bearer_header(&self) -> Result<String, ConnectorError> {
        match &self.access_token {
            Some(token) => Ok(format!("Bearer {token}")),
            None => Err(ConnectorError::auth(self.provider, "not authenticated")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn full_config(expires_at: Option<DateTime<Utc>>) -> OAuthConfig {
        OAuthConfig {
            access_token: Some("old-token".to_string()),
            refresh_token: Some("refresh-1".to_string()),
            client_id: Some("client-1".to_string()),
            client_secret: Some("secret-1".to_string()),
            token_expires_at: expires_at,
        }
    }

    #[tokio::test]
    async fn authenticate_requires_access_token() {
        let mut session = AuthSession::new(reqwest::Client::new(), "gmail");
        let err = session
            .authenticate(&OAuthConfig::default())
            .await
            .expect_err("should fail");
        assert!(matches!(err, ConnectorError::Authentication { .. }));
    }

    #[tokio::test]
    async fn authenticate_keeps_unexpired_token() {
        let mut session = AuthSession::new(reqwest::Client::new(), "gmail");
        let config = full_config(Some(Utc::now() + Duration::hours(1)));

        session.authenticate(&config).await.expect("authenticate");
        assert_eq!(session.access_token(), Some("old-token"));
        assert_eq!(session.bearer_header().expect("header"), "Bearer old-token");
    }

    #[tokio::test]
    async fn authenticate_refreshes_near_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-token",
                "expires_in": 3600,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut session = AuthSession::new(reqwest::Client::new(), "gmail")
            .with_token_url(&format!("{}/token", server.uri()));
        // 30s left: inside the 60s safety margin
        let config = full_config(Some(Utc::now() + Duration::seconds(30)));

        session.authenticate(&config).await.expect("authenticate");
        assert_eq!(session.access_token(), Some("new-token"));
    }

    #[tokio::test]
    async fn refresh_requires_client_secrets() {
        let mut session = AuthSession::new(reqwest::Client::new(), "gmail");
        let config = OAuthConfig {
            access_token: Some("t".to_string()),
            refresh_token: Some("r".to_string()),
            ..Default::default()
        };

        let err = session.refresh(&config).await.expect_err("should fail");
        assert!(err.to_string().contains("client_id"));
    }

    #[tokio::test]
    async fn refresh_surfaces_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let mut session = AuthSession::new(reqwest::Client::new(), "gmail")
            .with_token_url(&format!("{}/token", server.uri()));

        let err = session
            .refresh(&full_config(None))
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn ensure_valid_returns_current_token() {
        let mut session = AuthSession::new(reqwest::Client::new(), "gmail");
        session
            .authenticate(&full_config(Some(Utc::now() + Duration::hours(1))))
            .await
            .expect("authenticate");

        let token = session
            .ensure_valid(&full_config(None))
            .await
            .expect("valid");
        assert_eq!(token, "old-token");
    }

    #[tokio::test]
    async fn bearer_header_fails_before_authentication() {
        let session = AuthSession::new(reqwest::Client::new(), "gmail");
        assert!(session.bearer_header().is_err());
    }
}
