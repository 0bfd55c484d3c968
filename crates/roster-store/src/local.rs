use std::path::Path;

use fastrace::trace;
use heed::types::*;
use heed::{Database, Env, EnvOpenOptions};
use roster_types::UserRecord;
use tracing::debug;

use crate::{decode_users, Persistence, StorageError};

/// String-to-string store backed by an LMDB environment, with the
/// `getItem` / `setItem` / `removeItem` surface of browser local storage.
/// The user collection lives as JSON under a single key.
pub struct LocalStorage {
    env: Env,
    db: Database<Str, Str>,
    key: String,
}

/// Size of what is kept on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    /// Keys in the store, the user list included.
    pub entries: u64,
    /// Length of the stored user list JSON, 0 when cleared.
    pub users_bytes: u64,
    /// Pages in use by the environment, free pages excluded.
    pub disk_bytes: u64,
}

impl LocalStorage {
    pub fn open(path: &Path, key: &str, map_size: u64) -> Result<Self, StorageError> {
        std::fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size as usize)
                .max_dbs(1)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let db = env.create_database(&mut wtxn, None)?;
        wtxn.commit()?;

        debug!("Opened local storage at {} (key '{}')", path.display(), key);

        Ok(Self {
            env,
            db,
            key: key.to_string(),
        })
    }

    pub fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let rtxn = self.env.read_txn()?;
        let value = self.db.get(&rtxn, key)?.map(str::to_string);
        Ok(value)
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut wtxn = self.env.write_txn()?;
        self.db.put(&mut wtxn, key, value)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn remove_item(&self, key: &str) -> Result<bool, StorageError> {
        let mut wtxn = self.env.write_txn()?;
        let removed = self.db.delete(&mut wtxn, key)?;
        wtxn.commit()?;
        Ok(removed)
    }

    pub fn stats(&self) -> Result<StorageStats, StorageError> {
        let rtxn = self.env.read_txn()?;
        let entries = self.db.len(&rtxn)?;
        let users_bytes = self.db.get(&rtxn, &self.key)?.map_or(0, str::len);
        Ok(StorageStats {
            entries,
            users_bytes: users_bytes as u64,
            disk_bytes: self.env.non_free_pages_size()?,
        })
    }
}

impl Persistence for LocalStorage {
    #[trace]
    fn load(&self) -> Result<Option<Vec<UserRecord>>, StorageError> {
        let Some(text) = self.get_item(&self.key)? else {
            return Ok(None);
        };
        decode_users(&self.key, &text).map(Some)
    }

    #[trace]
    fn save(&mut self, users: &[UserRecord]) -> Result<(), StorageError> {
        let text = serde_json::to_string(users)?;

        let mut wtxn = self.env.write_txn()?;
        if self.db.get(&wtxn, &self.key)? == Some(text.as_str()) {
            debug!("Skipping unchanged write of {} users", users.len());
            return Ok(());
        }
        self.db.put(&mut wtxn, &self.key, &text)?;
        wtxn.commit()?;

        debug!("Saved {} users ({} bytes)", users.len(), text.len());
        Ok(())
    }

    #[trace]
    fn clear(&mut self) -> Result<(), StorageError> {
        self.remove_item(&self.key)?;
        debug!("Removed '{}' from local storage", self.key);
        Ok(())
    }
}
