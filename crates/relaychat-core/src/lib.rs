//! Relaychat Core: data model, errors, and configuration shared by the
//! client library and the CLI.
//!
//! - **types**: `ChatMessage`, `ConnectionState`
//! - **error**: `ChatError`, the error type of every session operation
//! - **config**: JSON config schema, loader, and env var overrides
//! - **utils**: data directory helpers

pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use error::ChatError;
pub use types::{ChatMessage, ConnectionState};
