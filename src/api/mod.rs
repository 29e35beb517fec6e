//! Clients for the external services the backend talks to.
//!
//! - `spotify_auth`: application-level OAuth (authorize URL, token endpoint).
//! - `spotify`: user-scoped Web API reads, fed by the token manager.
//! - `genius`: lyrics metadata search.
pub mod genius;
pub mod spotify;
pub mod spotify_auth;
