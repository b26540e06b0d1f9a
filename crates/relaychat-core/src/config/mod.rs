//! Configuration system: schema, loading, and env var overrides.
//!
//! # Usage
//! ```no_run
//! use relaychat_core::config;
//!
//! let cfg = config::load_config(None);
//! println!("Endpoint: {}", cfg.endpoint.url);
//! ```

pub mod loader;
pub mod schema;

pub use loader::{get_config_path, load_config, load_config_file, save_config};
pub use schema::{Config, EndpointConfig, ReconnectConfig, UserConfig};
