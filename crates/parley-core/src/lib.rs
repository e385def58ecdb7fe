//! # parley-core
//!
//! Core types, configuration, and utilities for Parley.
//!
//! This crate provides shared functionality used across all Parley crates:
//!
//! - **Configuration**: Loading, validation, and management of config files
//! - **Types**: Identities, messages, reactions, and room keys
//! - **Utilities**: Path resolution, environment handling, secret strings

pub mod config;
pub mod env;
pub mod error;
pub mod paths;
pub mod secret;
pub mod types;

// Re-exports for convenience
pub use config::Config;
pub use error::{Error, Result};
pub use secret::SecretString;
pub use types::*;
