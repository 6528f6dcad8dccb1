//! Chat Service Layer
//!
//! HTTP endpoints for messages, read state and presence. Every write that
//! affects other users is forwarded to the realtime hub after it is stored.

pub mod handlers;

pub use handlers::router;
