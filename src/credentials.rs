//! Credential Store: one delegated Spotify token record per local user.
//!
//! Writes are a single `INSERT ... ON CONFLICT(user_id) DO UPDATE` statement,
//! so concurrent upserts for the same user never interleave fields; the
//! later statement wins entirely. There is no delete here; rows
//! disappear only through the cascade from `app_user`.

use crate::db::DbPool;
use crate::error::{
    is_constraint, CoreError, Result, SQLITE_CONSTRAINT_FOREIGNKEY, SQLITE_CONSTRAINT_UNIQUE,
};
use crate::models::DelegatedCredential;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

/// Seconds shaved off the provider's `expires_in` to absorb clock skew and
/// in-flight latency.
pub const EXPIRY_MARGIN_SECS: i64 = 30;

#[derive(Clone)]
pub struct CredentialStore {
    pool: DbPool,
}

impl CredentialStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn get(&self, user_id: &str) -> Result<Option<DelegatedCredential>> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT user_id, spotify_user_id, access_token, refresh_token, scope, token_type, expires_at FROM spotify_account WHERE user_id = ?1",
                params![user_id],
                |r| {
                    Ok(DelegatedCredential {
                        user_id: r.get(0)?,
                        provider_user_id: r.get(1)?,
                        access_token: r.get(2)?,
                        refresh_token: r.get(3)?,
                        scope: r.get(4)?,
                        token_type: r.get(5)?,
                        expires_at: r.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Insert or replace the credential for `user_id`, computing
    /// `expires_at = now + expires_in_secs - EXPIRY_MARGIN_SECS`.
    #[allow(clippy::too_many_arguments)]
    pub fn upsert(
        &self,
        user_id: &str,
        provider_user_id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_in_secs: i64,
        scope: &str,
        token_type: &str,
    ) -> Result<DelegatedCredential> {
        let expires_at = Utc::now().timestamp() + expires_in_secs - EXPIRY_MARGIN_SECS;
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO spotify_account (user_id, spotify_user_id, access_token, refresh_token, scope, token_type, expires_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) ON CONFLICT(user_id) DO UPDATE SET spotify_user_id = excluded.spotify_user_id, access_token = excluded.access_token, refresh_token = excluded.refresh_token, scope = excluded.scope, token_type = excluded.token_type, expires_at = excluded.expires_at",
            params![user_id, provider_user_id, access_token, refresh_token, scope, token_type, expires_at],
        )
        .map_err(|e| {
            if is_constraint(&e, SQLITE_CONSTRAINT_FOREIGNKEY) {
                CoreError::ForeignKeyViolation
            } else if is_constraint(&e, SQLITE_CONSTRAINT_UNIQUE) {
                CoreError::Conflict(format!(
                    "spotify account {} is linked to another user",
                    provider_user_id
                ))
            } else {
                CoreError::from(e)
            }
        })?;
        Ok(DelegatedCredential {
            user_id: user_id.to_string(),
            provider_user_id: provider_user_id.to_string(),
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            scope: scope.to_string(),
            token_type: token_type.to_string(),
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::Role;
    use std::time::Duration;

    fn store() -> (tempfile::TempDir, DbPool, CredentialStore) {
        let td = tempfile::tempdir().unwrap();
        let pool = db::open_pool_at(&td.path().join("t.db"), 2, Duration::from_secs(5)).unwrap();
        (td, pool.clone(), CredentialStore::new(pool))
    }

    #[test]
    fn upsert_applies_margin_and_overwrites() {
        let (_td, pool, store) = store();
        let u = db::create_user(&pool.get().unwrap(), "a@x.io", "h", None, Role::User).unwrap();

        let before = Utc::now().timestamp();
        store.upsert(&u.id, "sp-1", "at1", "rt1", 3600, "user-top-read", "Bearer").unwrap();
        let c = store.get(&u.id).unwrap().unwrap();
        assert!(c.expires_at >= before + 3600 - EXPIRY_MARGIN_SECS);
        assert!(c.expires_at <= Utc::now().timestamp() + 3600 - EXPIRY_MARGIN_SECS);

        store.upsert(&u.id, "sp-1", "at2", "rt2", 60, "", "Bearer").unwrap();
        let c2 = store.get(&u.id).unwrap().unwrap();
        assert_eq!(c2.access_token, "at2");
        assert_eq!(c2.refresh_token, "rt2");
        let n: i64 = pool
            .get()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM spotify_account", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn upsert_for_unknown_user_is_fk_violation() {
        let (_td, _pool, store) = store();
        let err = store.upsert("ghost", "sp", "a", "r", 3600, "", "Bearer").unwrap_err();
        assert!(matches!(err, CoreError::ForeignKeyViolation));
    }

    #[test]
    fn provider_account_cannot_be_shared() {
        let (_td, pool, store) = store();
        let conn = pool.get().unwrap();
        let a = db::create_user(&conn, "a@x.io", "h", None, Role::User).unwrap();
        let b = db::create_user(&conn, "b@x.io", "h", None, Role::User).unwrap();
        store.upsert(&a.id, "sp-shared", "a", "r", 3600, "", "Bearer").unwrap();
        let err = store.upsert(&b.id, "sp-shared", "a", "r", 3600, "", "Bearer").unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[test]
    fn credential_is_removed_with_its_user() {
        let (_td, pool, store) = store();
        let conn = pool.get().unwrap();
        let u = db::create_user(&conn, "a@x.io", "h", None, Role::User).unwrap();
        store.upsert(&u.id, "sp", "a", "r", 3600, "", "Bearer").unwrap();
        assert!(db::delete_user(&conn, &u.id).unwrap());
        assert!(store.get(&u.id).unwrap().is_none());
    }
}
