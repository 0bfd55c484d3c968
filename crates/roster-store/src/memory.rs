use std::sync::{Arc, Mutex};

use roster_types::UserRecord;

use crate::{decode_users, Persistence, StorageError};

/// In-process storage holding the serialized collection as text, so the
/// JSON round trip matches `LocalStorage`. Clones share the same slot, which
/// lets a test keep a handle while the store owns another.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    key: String,
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryStorage {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts with arbitrary stored text, e.g. a corrupt value.
    pub fn with_raw(key: &str, raw: &str) -> Self {
        Self {
            key: key.to_string(),
            slot: Arc::new(Mutex::new(Some(raw.to_string()))),
        }
    }

    pub fn raw(&self) -> Option<String> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn set_raw(&self, raw: &str) -> Result<(), StorageError> {
        self.write(Some(raw.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.raw().is_none()
    }

    fn write(&self, value: Option<String>) -> Result<(), StorageError> {
        let mut slot = self.slot.lock().map_err(|_| StorageError::Poisoned)?;
        *slot = value;
        Ok(())
    }
}

impl Persistence for MemoryStorage {
    fn load(&self) -> Result<Option<Vec<UserRecord>>, StorageError> {
        let text = self.slot.lock().map_err(|_| StorageError::Poisoned)?.clone();
        match text {
            Some(text) => decode_users(&self.key, &text).map(Some),
            None => Ok(None),
        }
    }

    fn save(&mut self, users: &[UserRecord]) -> Result<(), StorageError> {
        let text = serde_json::to_string(users)?;
        self.write(Some(text))
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        self.write(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_types::{UserForm, UserId};

    #[test]
    fn test_clones_share_slot() {
        let handle = MemoryStorage::new("usersData");
        let mut owned = handle.clone();

        let record = UserForm::new("Ann", "a@b.com", "1234567890", "")
            .into_record(UserId(7), "data:,".to_string());
        owned.save(&[record.clone()]).unwrap();

        assert_eq!(handle.load().unwrap(), Some(vec![record]));
        owned.clear().unwrap();
        assert!(handle.is_empty());
    }

    #[test]
    fn test_raw_corrupt_value() {
        let storage = MemoryStorage::with_raw("usersData", "[{\"id\":");
        assert!(matches!(storage.load(), Err(StorageError::Corrupt { .. })));
    }

    #[test]
    fn test_poisoned_slot_is_an_error() {
        let mut storage = MemoryStorage::new("usersData");
        let handle = storage.clone();
        let _ = std::thread::spawn(move || {
            let _slot = handle.slot.lock().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        let record = UserForm::new("Ann", "a@b.com", "1234567890", "")
            .into_record(UserId(7), "data:,".to_string());
        assert!(matches!(storage.save(&[record]), Err(StorageError::Poisoned)));
        assert!(matches!(storage.clear(), Err(StorageError::Poisoned)));
        assert!(matches!(storage.load(), Err(StorageError::Poisoned)));
        assert!(storage.set_raw("[]").is_err());
    }
}
