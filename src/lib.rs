//! Core library for music-reco-backend
pub mod config;
pub mod error;
pub mod db;
pub mod models;
pub mod api;
pub mod auth;
pub mod credentials;
pub mod token;
pub mod events;
pub mod recommendations;
pub mod service;

pub use error::{CoreError, Result};
pub use service::Backend;
