mod local;
mod memory;

pub use local::*;
pub use memory::*;

use roster_types::UserRecord;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("LMDB error: {0}")]
    Lmdb(#[from] heed::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Stored value under '{key}' is not a user list: {message}")]
    Corrupt { key: String, message: String },
    #[error("Storage lock poisoned by a panicked writer")]
    Poisoned,
}

/// Durable home of the user collection. The whole list is written on every
/// change and removed once it is empty; the last writer wins.
pub trait Persistence {
    /// `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> Result<Option<Vec<UserRecord>>, StorageError>;

    fn save(&mut self, users: &[UserRecord]) -> Result<(), StorageError>;

    fn clear(&mut self) -> Result<(), StorageError>;
}

pub(crate) fn decode_users(key: &str, text: &str) -> Result<Vec<UserRecord>, StorageError> {
    serde_json::from_str(text).map_err(|e| StorageError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })
}
