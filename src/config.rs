use anyhow::{bail, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Immutable runtime configuration. Built once and handed to each component
/// at construction; nothing in the library reads the environment.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // path to database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_db_pool_size")]
    pub db_pool_size: u32,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    // Local bearer tokens
    pub jwt_secret: String,
    #[serde(default = "default_jwt_issuer")]
    pub jwt_issuer: String,
    #[serde(default = "default_jwt_expire_min")]
    pub jwt_expire_min: i64,

    // Spotify application credentials
    #[serde(default)]
    pub spotify_client_id: String,
    #[serde(default)]
    pub spotify_client_secret: String,
    #[serde(default = "default_redirect_uri")]
    pub spotify_redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub spotify_scopes: String,
    #[serde(default = "default_spotify_auth_base")]
    pub spotify_auth_base: String,
    /// Includes the `/v1` path.
    #[serde(default = "default_spotify_api_base")]
    pub spotify_api_base: String,

    // Lyrics metadata
    #[serde(default)]
    pub genius_api_token: Option<String>,
    #[serde(default = "default_genius_api_base")]
    pub genius_api_base: String,

    /// Upper bound for any network call or storage checkout.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_db_path() -> PathBuf { "/var/lib/music-reco/music-reco.db".into() }
fn default_db_pool_size() -> u32 { 8 }
fn default_log_dir() -> PathBuf { "/var/log/music-reco".into() }
fn default_jwt_issuer() -> String { "music-backend".into() }
fn default_jwt_expire_min() -> i64 { 60 }
fn default_redirect_uri() -> String { "http://localhost:8000/auth/spotify/callback".into() }
fn default_scopes() -> String { "user-top-read".into() }
fn default_spotify_auth_base() -> String { "https://accounts.spotify.com".into() }
fn default_spotify_api_base() -> String { "https://api.spotify.com/v1".into() }
fn default_genius_api_base() -> String { "https://api.genius.com".into() }
fn default_http_timeout() -> u64 { 20 }

impl Config {
    pub fn from_path(path: &std::path::Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.trim().is_empty() {
            bail!("jwt_secret must not be empty");
        }
        if self.http_timeout_secs == 0 {
            bail!("http_timeout_secs must be greater than zero");
        }
        if self.db_pool_size == 0 {
            bail!("db_pool_size must be greater than zero");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Configuration for tests: a database under `db_path` and every
    /// provider endpoint pointed at `mock_base`.
    pub fn for_tests(db_path: PathBuf, mock_base: &str) -> Self {
        Self {
            db_path,
            db_pool_size: 4,
            log_dir: std::env::temp_dir(),
            jwt_secret: "test_jwt_secret_at_least_32_bytes!!".into(),
            jwt_issuer: default_jwt_issuer(),
            jwt_expire_min: default_jwt_expire_min(),
            spotify_client_id: "test_id".into(),
            spotify_client_secret: "test_secret".into(),
            spotify_redirect_uri: default_redirect_uri(),
            spotify_scopes: default_scopes(),
            spotify_auth_base: mock_base.to_string(),
            spotify_api_base: mock_base.to_string(),
            genius_api_token: Some("genius-token".into()),
            genius_api_base: mock_base.to_string(),
            http_timeout_secs: 5,
        }
    }
}
