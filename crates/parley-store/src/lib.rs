//! Durable message store for Parley.
//!
//! This crate provides:
//! - The [`MessageStore`] boundary the gateway consumes
//! - A SQLite implementation backed by sqlx
//! - An in-process implementation for tests and ephemeral runs

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryMessageStore;
pub use sqlite::SqliteMessageStore;
pub use store::{HistoryPage, MessageStore, SoftDeleted};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
