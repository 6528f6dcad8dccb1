//! Core Service Layer
//!
//! Shared infrastructure for the Convo server: authentication, data models,
//! configuration, errors and the storage collaborators.

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod router;
pub mod store;

// Re-exports for convenience
pub use auth::Ctx;
pub use config::{AppState, ServerConfig};
pub use error::{Error, Result};
pub use router::router;
