//! Token Refresh Manager.
//!
//! `ensure_valid_token` is called on every provider-facing request. The hot
//! path is a single row read; only an expired credential causes a network
//! call. Refreshes are serialized per user so concurrent callers for the
//! same user share one exchange, and a failed exchange never touches the
//! stored credential.

use crate::api::spotify_auth::SpotifyAuth;
use crate::credentials::CredentialStore;
use crate::db::run_blocking;
use crate::error::{CoreError, Result};
use crate::models::DelegatedCredential;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const DEFAULT_EXPIRES_IN: i64 = 3600;

type RefreshLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

#[derive(Clone)]
pub struct TokenManager {
    store: CredentialStore,
    auth: SpotifyAuth,
    refresh_locks: RefreshLocks,
}

impl TokenManager {
    pub fn new(store: CredentialStore, auth: SpotifyAuth) -> Self {
        Self {
            store,
            auth,
            refresh_locks: Arc::new(DashMap::new()),
        }
    }

    async fn load(&self, user_id: &str) -> Result<Option<DelegatedCredential>> {
        let store = self.store.clone();
        let uid = user_id.to_string();
        run_blocking(move || store.get(&uid)).await
    }

    /// Return an access token that is valid right now for `user_id`,
    /// refreshing and persisting it first when the stored one has expired.
    pub async fn ensure_valid_token(&self, user_id: &str) -> Result<String> {
        let cred = self.load(user_id).await?.ok_or(CoreError::NotConnected)?;
        if Utc::now().timestamp() < cred.expires_at {
            return Ok(cred.access_token);
        }

        let lock = self
            .refresh_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another task may have refreshed while we waited for the lock.
        let cred = self.load(user_id).await?.ok_or(CoreError::NotConnected)?;
        if Utc::now().timestamp() < cred.expires_at {
            debug!(user_id, "token refreshed by a concurrent caller");
            return Ok(cred.access_token);
        }

        info!(user_id, "spotify access token expired, refreshing");
        let refreshed = self.refresh(cred).await?;
        Ok(refreshed.access_token)
    }

    async fn refresh(&self, cred: DelegatedCredential) -> Result<DelegatedCredential> {
        let tr = match self.auth.refresh(&cred.refresh_token).await {
            Ok(tr) => tr,
            Err(e) => {
                warn!(user_id = %cred.user_id, error = %e, "spotify token refresh failed; keeping stored credential");
                return Err(e);
            }
        };

        // Spotify usually omits refresh_token on refresh; keep ours then.
        let refresh_token = tr.refresh_token.unwrap_or_else(|| cred.refresh_token.clone());
        let scope = tr.scope.unwrap_or_else(|| cred.scope.clone());
        let token_type = tr.token_type.unwrap_or_else(|| "Bearer".into());
        let expires_in = tr.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
        let access_token = tr.access_token;

        let store = self.store.clone();
        let updated = run_blocking(move || {
            store.upsert(
                &cred.user_id,
                &cred.provider_user_id,
                &access_token,
                &refresh_token,
                expires_in,
                &scope,
                &token_type,
            )
        })
        .await?;
        info!(user_id = %updated.user_id, expires_at = updated.expires_at, "spotify token refreshed");
        Ok(updated)
    }
}
