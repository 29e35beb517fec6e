//! `Backend` wires every component from one immutable `Config` and exposes
//! the operations the rest of the system calls.

use crate::api::genius::GeniusClient;
use crate::api::spotify::SpotifyGateway;
use crate::api::spotify_auth::SpotifyAuth;
use crate::auth::{self, AuthService, Claims};
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::db::{self, run_blocking, DbPool};
use crate::error::{CoreError, Result};
use crate::events::EventLog;
use crate::models::{ActivityEvent, DelegatedCredential, LocalUser, NewEvent, Payload, Role};
use crate::recommendations::RecommendationAggregator;
use crate::token::TokenManager;
use reqwest::Client;
use tracing::info;

const MAX_LISTED_USERS: u32 = 100;

#[derive(Clone)]
pub struct Backend {
    pool: DbPool,
    auth: AuthService,
    credentials: CredentialStore,
    tokens: TokenManager,
    events: EventLog,
    aggregator: RecommendationAggregator,
    spotify_auth: SpotifyAuth,
    spotify: SpotifyGateway,
    genius: GeniusClient,
}

/// Shared HTTP client; every request is bounded by the configured timeout.
pub fn http_client(cfg: &Config) -> Result<Client> {
    Client::builder()
        .timeout(cfg.timeout())
        .build()
        .map_err(|e| CoreError::Internal(anyhow::anyhow!("building http client: {}", e)))
}

impl Backend {
    pub fn new(cfg: &Config) -> Result<Self> {
        let pool = db::open_pool(cfg)?;
        Self::with_pool(cfg, pool)
    }

    pub fn with_pool(cfg: &Config, pool: DbPool) -> Result<Self> {
        let client = http_client(cfg)?;
        let credentials = CredentialStore::new(pool.clone());
        let spotify_auth = SpotifyAuth::new(cfg, client.clone());
        let tokens = TokenManager::new(credentials.clone(), spotify_auth.clone());
        let aggregator = RecommendationAggregator::new(pool.clone());
        Ok(Self {
            auth: AuthService::new(cfg),
            events: EventLog::new(pool.clone(), aggregator.clone()),
            spotify: SpotifyGateway::new(cfg, client.clone(), tokens.clone()),
            genius: GeniusClient::new(cfg, client),
            pool,
            credentials,
            tokens,
            aggregator,
            spotify_auth,
        })
    }

    pub fn spotify(&self) -> &SpotifyGateway {
        &self.spotify
    }

    pub fn genius(&self) -> &GeniusClient {
        &self.genius
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    // ---- local users -------------------------------------------------------

    pub async fn register(&self, email: &str, password: &str, display_name: Option<&str>) -> Result<LocalUser> {
        self.create_user(email, password, display_name, Role::User).await
    }

    pub async fn create_user(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
        role: Role,
    ) -> Result<LocalUser> {
        let pool = self.pool.clone();
        let email = email.to_string();
        let password = password.to_string();
        let display_name = display_name.map(str::to_string);
        let user = run_blocking(move || {
            let hash = auth::hash_password(&password)?;
            let conn = pool.get()?;
            db::create_user(&conn, &email, &hash, display_name.as_deref(), role)
        })
        .await?;
        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    /// Email + password login, returning a bearer token.
    pub async fn login(&self, email: &str, password: &str) -> Result<String> {
        let pool = self.pool.clone();
        let email = email.to_string();
        let password = password.to_string();
        let user = run_blocking(move || {
            let conn = pool.get()?;
            match db::get_user_by_email(&conn, &email)? {
                Some(u) if auth::verify_password(&password, &u.password_hash) => Ok(u),
                _ => Err(CoreError::InvalidCredentials),
            }
        })
        .await?;
        self.auth.issue(&user.id, user.role, None)
    }

    pub fn authenticate(&self, bearer: &str) -> Result<Claims> {
        self.auth.verify(bearer)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<LocalUser> {
        let pool = self.pool.clone();
        let uid = user_id.to_string();
        run_blocking(move || {
            let conn = pool.get()?;
            db::get_user(&conn, &uid)
        })
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("user {}", user_id)))
    }

    /// Admin-only listing of local users.
    pub async fn list_users(&self, caller: &Claims) -> Result<Vec<LocalUser>> {
        auth::require_role(caller, &[Role::Admin])?;
        let pool = self.pool.clone();
        run_blocking(move || {
            let conn = pool.get()?;
            db::list_users(&conn, MAX_LISTED_USERS)
        })
        .await
    }

    /// Remove a user together with its credential, events and cache row.
    pub async fn delete_user(&self, user_id: &str) -> Result<()> {
        let pool = self.pool.clone();
        let uid = user_id.to_string();
        let removed = run_blocking(move || {
            let conn = pool.get()?;
            db::delete_user(&conn, &uid)
        })
        .await?;
        if !removed {
            return Err(CoreError::NotFound(format!("user {}", user_id)));
        }
        info!(user_id, "user deleted");
        Ok(())
    }

    pub async fn set_preferred_lang(&self, user_id: &str, lang: &str) -> Result<()> {
        let pool = self.pool.clone();
        let uid = user_id.to_string();
        let lang = lang.to_string();
        run_blocking(move || {
            let conn = pool.get()?;
            db::update_preferred_lang(&conn, &uid, &lang)
        })
        .await
    }

    // ---- spotify authorization ---------------------------------------------

    pub fn spotify_authorize_url(&self, user_id: &str) -> Result<String> {
        let state = self.auth.issue_oauth_state(user_id)?;
        Ok(self.spotify_auth.authorize_url(&state)?.to_string())
    }

    /// Finish the authorization redirect: check `state`, exchange `code`,
    /// look up the Spotify user and store the credential.
    pub async fn complete_spotify_authorization(&self, state: &str, code: &str) -> Result<DelegatedCredential> {
        let user_id = self.auth.verify_oauth_state(state)?;
        let tr = self.spotify_auth.exchange_code(code).await?;
        let me = self.spotify.get_with_token(&tr.access_token, "/me", &[]).await?;
        let provider_user_id = me["id"]
            .as_str()
            .ok_or_else(|| CoreError::Upstream {
                status: None,
                detail: "spotify /me response has no id".into(),
            })?
            .to_string();

        let store = self.credentials.clone();
        let refresh_token = tr.refresh_token.unwrap_or_default();
        let expires_in = tr.expires_in.unwrap_or(3600);
        let scope = tr.scope.unwrap_or_default();
        let token_type = tr.token_type.unwrap_or_else(|| "Bearer".into());
        let access_token = tr.access_token;
        let uid = user_id.clone();
        let cred = run_blocking(move || {
            store.upsert(
                &uid,
                &provider_user_id,
                &access_token,
                &refresh_token,
                expires_in,
                &scope,
                &token_type,
            )
        })
        .await?;
        info!(user_id = %user_id, spotify_user_id = %cred.provider_user_id, "spotify account connected");
        Ok(cred)
    }

    pub async fn credential(&self, user_id: &str) -> Result<Option<DelegatedCredential>> {
        let store = self.credentials.clone();
        let uid = user_id.to_string();
        run_blocking(move || store.get(&uid)).await
    }

    // ---- core operations ---------------------------------------------------

    pub async fn ensure_valid_token(&self, user_id: &str) -> Result<String> {
        self.tokens.ensure_valid_token(user_id).await
    }

    /// Append an event and synchronously refresh every user's recommendations.
    pub async fn append_event(&self, user_id: &str, kind: &str, payload: Payload) -> Result<i64> {
        let events = self.events.clone();
        let uid = user_id.to_string();
        let kind = kind.to_string();
        run_blocking(move || events.append(&uid, &kind, &payload)).await
    }

    /// Ingestion on behalf of an authenticated caller, who may only record
    /// events for themselves.
    pub async fn append_event_as(&self, caller: &Claims, event: NewEvent) -> Result<i64> {
        if event.user_id != caller.sub {
            return Err(CoreError::Forbidden);
        }
        self.append_event(&event.user_id, &event.kind, event.payload).await
    }

    pub async fn list_events(&self, user_id: &str, kind: Option<&str>) -> Result<Vec<ActivityEvent>> {
        let events = self.events.clone();
        let uid = user_id.to_string();
        let kind = kind.map(str::to_string);
        run_blocking(move || events.list_for_user(&uid, kind.as_deref())).await
    }

    pub async fn refresh_all_recommendations(&self) -> Result<usize> {
        let aggregator = self.aggregator.clone();
        run_blocking(move || aggregator.refresh_all()).await
    }

    pub async fn get_recommendations(&self, user_id: &str) -> Result<Vec<String>> {
        let aggregator = self.aggregator.clone();
        let uid = user_id.to_string();
        run_blocking(move || aggregator.get(&uid)).await
    }
}
