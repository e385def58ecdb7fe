//! CLI command implementations.

pub mod config;
pub mod directory;
pub mod serve;
