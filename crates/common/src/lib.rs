//! Shared types, config, and error definitions for the hedge engine.

pub mod config;
pub mod error;
pub mod lock;
pub mod types;

pub use config::{ExecutionConfig, GateConfig, KillSwitchConfig, StoreConfig};
pub use error::Error;
pub use lock::DirLock;
pub use types::*;

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
