//! Shared types for the atelier asset core.
//!
//! # Invariants
//! - Project asset ids are random; built-in asset ids are derived from their
//!   path and stay stable across sessions.
//! - Asset paths are always stored with forward slashes and no leading slash.

pub mod config;
pub mod types;

pub use config::{AssetConfig, ConfigError, ReadFailurePolicy};
pub use types::{AssetId, AssetPath};

pub fn crate_info() -> &'static str {
    "atelier-common v0.1.0"
}
