//! Persistent key-value storage for the CardKing client.
//!
//! This crate provides:
//! - **[`KeyValueStore`]**: the async string store the host platform supplies
//! - **[`MemoryStore`]** and **[`FileStore`]**: in-process and JSON-file backends
//! - **[`TokenStore`]**: typed, atomic access to the credential set

mod file;
mod keys;
mod memory;
mod tokens;
mod traits;

pub use file::FileStore;
pub use keys::StorageKeys;
pub use memory::MemoryStore;
pub use tokens::{TokenData, TokenStore};
pub use traits::{KeyValueStore, KeyValueStoreExt};

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend rejected the operation
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Stored value could not be encoded or decoded
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
