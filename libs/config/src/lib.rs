//! # Spindle Configuration
//!
//! Runtime settings for a Spindle node and the listener option layering.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use config::RuntimeConfig;
//! use std::path::Path;
//!
//! let config = RuntimeConfig::load(Some(Path::new("config/spindle.toml")))?;
//! println!("starting {} workers", config.workers);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod listen_options;
pub mod runtime_config;

// Re-export commonly used types
pub use listen_options::{ListenOptions, PACKET_KEY};
pub use runtime_config::{RuntimeConfig, DEFAULT_BIND_ADDRESS, ENV_PREFIX};
