//! Error taxonomy shared by every component of the backend.

use rusqlite::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// No delegated credential on file; the user has to (re)authorize.
    #[error("user is not connected to Spotify")]
    NotConnected,

    /// The provider rejected or could not process a refresh-token exchange.
    /// The stored credential is left untouched.
    #[error("token refresh failed (status {status:?}): {detail}")]
    RefreshFailed { status: Option<u16>, detail: String },

    /// Non-auth upstream failure; status preserved for diagnostics.
    #[error("upstream error (status {status:?}): {detail}")]
    Upstream { status: Option<u16>, detail: String },

    #[error("referenced user does not exist")]
    ForeignKeyViolation,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation timed out")]
    Timeout,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("token expired")]
    TokenExpired,

    #[error("invalid token")]
    TokenInvalid,

    #[error("forbidden")]
    Forbidden,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// What a caller outside the core should show for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFacing {
    NeedsReconnection,
    NotAuthorized,
    NotFound,
    ServiceUnavailable,
    BadRequest,
    Internal,
}

impl CoreError {
    pub fn user_facing(&self) -> UserFacing {
        match self {
            CoreError::NotConnected | CoreError::RefreshFailed { .. } => UserFacing::NeedsReconnection,
            CoreError::InvalidCredentials
            | CoreError::TokenExpired
            | CoreError::TokenInvalid
            | CoreError::Forbidden => UserFacing::NotAuthorized,
            CoreError::NotFound(_) => UserFacing::NotFound,
            CoreError::Upstream { .. } | CoreError::Timeout | CoreError::NotConfigured(_) => {
                UserFacing::ServiceUnavailable
            }
            CoreError::ForeignKeyViolation
            | CoreError::Conflict(_)
            | CoreError::InvalidPayload(_) => UserFacing::BadRequest,
            CoreError::Storage(_) | CoreError::Pool(_) | CoreError::Serde(_) | CoreError::Internal(_) => {
                UserFacing::Internal
            }
        }
    }

    /// Map a transport failure from reqwest onto the upstream taxonomy.
    pub(crate) fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CoreError::Timeout
        } else {
            CoreError::Upstream {
                status: e.status().map(|s| s.as_u16()),
                detail: e.to_string(),
            }
        }
    }
}

/// True when the sqlite error is a constraint violation with the given extended code.
pub(crate) fn is_constraint(e: &rusqlite::Error, extended: i32) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == ErrorCode::ConstraintViolation && f.extended_code == extended
    )
}

pub(crate) const SQLITE_CONSTRAINT_FOREIGNKEY: i32 = 787;
pub(crate) const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

pub type Result<T> = std::result::Result<T, CoreError>;
