use crate::config::Config;
use crate::error::{CoreError, Result};
use base64::{engine::general_purpose, Engine as _};
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// Body returned by the Spotify token endpoint for both grant types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Client for the application-level side of Spotify OAuth: building the
/// authorization URL and talking to `/api/token` with the app credentials.
#[derive(Clone)]
pub struct SpotifyAuth {
    client: Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scopes: String,
    auth_base: String,
}

impl SpotifyAuth {
    pub fn new(cfg: &Config, client: Client) -> Self {
        Self {
            client,
            client_id: cfg.spotify_client_id.clone(),
            client_secret: cfg.spotify_client_secret.clone(),
            redirect_uri: cfg.spotify_redirect_uri.clone(),
            scopes: cfg.spotify_scopes.clone(),
            auth_base: cfg.spotify_auth_base.trim_end_matches('/').to_string(),
        }
    }

    fn ensure_configured(&self) -> Result<()> {
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(CoreError::NotConfigured("spotify client credentials"));
        }
        Ok(())
    }

    fn basic_auth_header(&self) -> String {
        format!(
            "Basic {}",
            general_purpose::STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret))
        )
    }

    fn token_url(&self) -> String {
        format!("{}/api/token", self.auth_base)
    }

    /// URL the user opens to grant the app access. `state` is echoed back
    /// to the redirect URI untouched.
    pub fn authorize_url(&self, state: &str) -> Result<Url> {
        self.ensure_configured()?;
        let mut url = Url::parse(&format!("{}/authorize", self.auth_base))
            .map_err(|e| CoreError::Internal(anyhow::anyhow!("invalid spotify_auth_base: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", &self.scopes)
            .append_pair("state", state);
        Ok(url)
    }

    /// Exchange an authorization code for the first token pair.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse> {
        self.ensure_configured()?;
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        let resp = self
            .client
            .post(self.token_url())
            .header(AUTHORIZATION, self.basic_auth_header())
            .form(&params)
            .send()
            .await
            .map_err(CoreError::from_transport)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CoreError::Upstream {
                status: Some(status.as_u16()),
                detail: format!("code exchange failed: {}", body),
            });
        }
        let tr: TokenResponse = resp.json().await.map_err(CoreError::from_transport)?;
        if tr.refresh_token.is_none() {
            return Err(CoreError::Upstream {
                status: Some(status.as_u16()),
                detail: "code exchange returned no refresh_token".into(),
            });
        }
        Ok(tr)
    }

    /// Trade a refresh token for a new access token. Every failure, including
    /// transport errors and timeouts, is reported as `RefreshFailed`.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        self.ensure_configured()?;
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let resp = self
            .client
            .post(self.token_url())
            .header(AUTHORIZATION, self.basic_auth_header())
            .form(&params)
            .send()
            .await
            .map_err(|e| CoreError::RefreshFailed {
                status: e.status().map(|s| s.as_u16()),
                detail: if e.is_timeout() { "timed out".into() } else { e.to_string() },
            })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            debug!(%status, "spotify refresh rejected");
            return Err(CoreError::RefreshFailed {
                status: Some(status.as_u16()),
                detail: body,
            });
        }
        resp.json::<TokenResponse>()
            .await
            .map_err(|e| CoreError::RefreshFailed {
                status: Some(status.as_u16()),
                detail: format!("unreadable token response: {}", e),
            })
    }
}
