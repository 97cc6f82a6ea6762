use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use growroom_api::Sector;
use parking_lot::Mutex;

use crate::error::Result;
use crate::settings;

/// Key of the sector replayed after a reconnect.
pub const LAST_ACTIVE_SECTOR: &str = "lastActiveSector";

/// Durable string key/value store surviving restarts.
pub trait LocalStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    fn remove_item(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.data.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.data.lock().remove(key);
        Ok(())
    }
}

/// Keys kept as one JSON object on disk, rewritten on every change.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    data: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let data = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!("Opened storage at {}", path.display());

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        fs::write(&self.path, serde_json::to_vec_pretty(data)?)?;
        Ok(())
    }
}

impl LocalStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self.data.lock();
        data.insert(key.to_string(), value.to_string());
        self.persist(&data)
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let mut data = self.data.lock();
        if data.remove(key).is_some() {
            self.persist(&data)?;
        }
        Ok(())
    }
}

/// File backed storage when a path is configured, in-memory otherwise.
pub fn open(settings: &settings::Storage) -> Result<Arc<dyn LocalStorage>> {
    Ok(match &settings.path {
        Some(path) => Arc::new(FileStorage::open(path)?),
        None => Arc::new(MemoryStorage::new()),
    })
}

/// Reads the persisted sector, falling back to `A`.
pub fn last_active_sector(storage: &dyn LocalStorage) -> Sector {
    match storage.get_item(LAST_ACTIVE_SECTOR) {
        Ok(Some(value)) => value.parse().unwrap_or_else(|e| {
            tracing::warn!("Ignoring stored sector: {}", e);
            Sector::default()
        }),
        Ok(None) => Sector::default(),
        Err(e) => {
            tracing::error!("Failed to read {}: {}", LAST_ACTIVE_SECTOR, e);
            Sector::default()
        }
    }
}

pub fn store_active_sector(storage: &dyn LocalStorage, sector: Sector) -> Result<()> {
    storage.set_item(LAST_ACTIVE_SECTOR, sector.as_str())
}

#[cfg(test)]
mod tests {
    use std::env;

    use uuid::Uuid;

    use super::*;

    fn temp_file() -> PathBuf {
        env::temp_dir()
            .join(format!("growroom-{}", Uuid::new_v4()))
            .join("state.json")
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get_item("k").unwrap(), None);

        storage.set_item("k", "v").unwrap();
        assert_eq!(storage.get_item("k").unwrap().as_deref(), Some("v"));

        storage.remove_item("k").unwrap();
        assert_eq!(storage.get_item("k").unwrap(), None);
    }

    #[test]
    fn test_file_storage_survives_reopen() {
        let path = temp_file();

        let storage = FileStorage::open(&path).unwrap();
        store_active_sector(&storage, Sector::C).unwrap();
        drop(storage);

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(last_active_sector(&reopened), Sector::C);

        reopened.remove_item(LAST_ACTIVE_SECTOR).unwrap();
        let again = FileStorage::open(&path).unwrap();
        assert_eq!(again.get_item(LAST_ACTIVE_SECTOR).unwrap(), None);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_file_storage_rejects_corrupt_file() {
        let path = temp_file();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        assert!(FileStorage::open(&path).is_err());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_open_from_settings() {
        let storage = open(&settings::Storage { path: None }).unwrap();
        assert_eq!(last_active_sector(storage.as_ref()), Sector::A);

        let path = temp_file();
        let storage = open(&settings::Storage {
            path: Some(path.to_string_lossy().to_string()),
        })
        .unwrap();
        store_active_sector(storage.as_ref(), Sector::B).unwrap();
        assert!(path.is_file());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_last_active_sector_fallback() {
        let storage = MemoryStorage::new();
        assert_eq!(last_active_sector(&storage), Sector::A);

        storage.set_item(LAST_ACTIVE_SECTOR, "Q").unwrap();
        assert_eq!(last_active_sector(&storage), Sector::A);

        storage.set_item(LAST_ACTIVE_SECTOR, "D").unwrap();
        assert_eq!(last_active_sector(&storage), Sector::D);
    }
}
