//! Local credentials: password hashing and bearer-token issuance/verification.

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::models::Role;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

/// Scope carried by the short-lived token used as OAuth `state`.
pub const OAUTH_STATE_SCOPE: &str = "oauth_state";
const OAUTH_STATE_TTL_MIN: i64 = 10;

pub fn hash_password(raw: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(raw.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| CoreError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))
}

/// False for a wrong password or an unparseable stored hash.
pub fn verify_password(raw: &str, hashed: &str) -> bool {
    match PasswordHash::new(hashed) {
        Ok(parsed) => Argon2::default().verify_password(raw.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub scope: Vec<String>,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
    /// Random nonce; only set on OAuth state tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl Claims {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope.iter().any(|s| s == scope)
    }
}

#[derive(Clone)]
pub struct AuthService {
    secret: Vec<u8>,
    issuer: String,
    expire_min: i64,
}

impl AuthService {
    pub fn new(cfg: &Config) -> Self {
        Self {
            secret: cfg.jwt_secret.as_bytes().to_vec(),
            issuer: cfg.jwt_issuer.clone(),
            expire_min: cfg.jwt_expire_min,
        }
    }

    /// Issue an HS256 bearer token; `scope` defaults to `["user"]`.
    pub fn issue(&self, sub: &str, role: Role, scope: Option<Vec<String>>) -> Result<String> {
        self.issue_for(sub, role, scope.unwrap_or_else(|| vec!["user".into()]), self.expire_min, None)
    }

    fn issue_for(
        &self,
        sub: &str,
        role: Role,
        scope: Vec<String>,
        ttl_min: i64,
        jti: Option<String>,
    ) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: sub.to_string(),
            role,
            scope,
            exp: (now + Duration::minutes(ttl_min)).timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
            jti,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| CoreError::Internal(anyhow::anyhow!("token encoding failed: {}", e)))
    }

    /// Verify signature, issuer and expiry.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[self.issuer.as_str()]);
        decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|d| d.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => CoreError::TokenExpired,
                _ => CoreError::TokenInvalid,
            })
    }

    /// Opaque `state` for the Spotify authorization redirect, bound to `user_id`.
    pub fn issue_oauth_state(&self, user_id: &str) -> Result<String> {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        self.issue_for(
            user_id,
            Role::User,
            vec![OAUTH_STATE_SCOPE.into()],
            OAUTH_STATE_TTL_MIN,
            Some(nonce),
        )
    }

    /// Local user id the `state` was issued for.
    pub fn verify_oauth_state(&self, state: &str) -> Result<String> {
        let claims = self.verify(state)?;
        if !claims.has_scope(OAUTH_STATE_SCOPE) {
            return Err(CoreError::TokenInvalid);
        }
        Ok(claims.sub)
    }
}

pub fn require_role(claims: &Claims, roles: &[Role]) -> Result<()> {
    if roles.contains(&claims.role) {
        Ok(())
    } else {
        Err(CoreError::Forbidden)
    }
}
