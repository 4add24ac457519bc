use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::ffi::OsString;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

pub const STORAGE_VERSION: u32 = 1;
const STORAGE_MINOR_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] io::Error),
    #[error("storage document is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("storage version {found} is not supported")]
    UnsupportedVersion { found: u32 },
}

/// On-disk envelope, same layout as Home Assistant's `.storage` documents
#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument<T> {
    version: u32,
    #[serde(default)]
    minor_version: u32,
    key: String,
    data: T,
}

/// A single versioned JSON document holding one `T`
#[derive(Debug, Clone)]
pub struct JsonStore<T> {
    key: String,
    path: PathBuf,
    _data: PhantomData<fn() -> T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(storage_dir: impl AsRef<Path>, key: &str) -> Self {
        Self {
            key: key.to_string(),
            path: storage_dir.as_ref().join(key),
            _data: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the stored value. `Ok(None)` means nothing was saved yet.
    pub async fn load(&self) -> Result<Option<T>, StorageError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let document: StoredDocument<serde_json::Value> = serde_json::from_str(&contents)?;
        if document.version > STORAGE_VERSION {
            return Err(StorageError::UnsupportedVersion {
                found: document.version,
            });
        }
        if document.data.is_null() {
            return Ok(None);
        }

        Ok(Some(serde_json::from_value(document.data)?))
    }

    /// Writes the whole document, replacing the previous one
    pub async fn save(&self, data: &T) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let document = StoredDocument {
            version: STORAGE_VERSION,
            minor_version: STORAGE_MINOR_VERSION,
            key: self.key.clone(),
            data,
        };
        let contents = serde_json::to_string_pretty(&document)?;

        let temp_path = self.temp_path();
        fs::write(&temp_path, contents).await?;
        fs::rename(&temp_path, &self.path).await?;

        tracing::debug!(path = %self.path.display(), "saved {}", self.key);
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::Reading;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_missing_file_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonStore<Reading> = JsonStore::new(dir.path(), "heating_oil_level.storage_a");

        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("nested"), "heating_oil_level.storage_a");

        let reading = Reading {
            last_reading: Some(500.0),
            last_reading_date: NaiveDate::from_ymd_opt(2024, 1, 31)
                .and_then(|d| d.and_hms_opt(8, 15, 0)),
            energy_at_reading: Some(1000.0),
        };
        store.save(&reading).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(reading));

        // Envelope matches the host's storage layout
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["key"], "heating_oil_level.storage_a");
        assert_eq!(raw["data"]["last_reading"], 500.0);
        assert_eq!(raw["data"]["last_reading_date"], "2024-01-31T08:15:00");
        assert!(!dir.path().join("nested/heating_oil_level.storage_a.tmp").exists());
    }

    #[tokio::test]
    async fn test_loads_existing_record_with_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("heating_oil_level.storage_b"),
            r#"{
                "version": 1,
                "key": "heating_oil_level.storage_b",
                "data": {
                    "last_reading": 800.0,
                    "last_reading_date": "2024-11-02T17:04:31.558812"
                }
            }"#,
        )
        .unwrap();

        let store: JsonStore<Reading> = JsonStore::new(dir.path(), "heating_oil_level.storage_b");
        let reading = store.load().await.unwrap().unwrap();

        assert_eq!(reading.last_reading, Some(800.0));
        assert!(reading.last_reading_date.is_some());
        assert_eq!(reading.energy_at_reading, None);
    }

    #[tokio::test]
    async fn test_rejects_newer_version() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("heating_oil_level.storage_c"),
            r#"{"version": 2, "key": "heating_oil_level.storage_c", "data": {}}"#,
        )
        .unwrap();

        let store: JsonStore<Reading> = JsonStore::new(dir.path(), "heating_oil_level.storage_c");
        let result = store.load().await;

        assert!(matches!(
            result,
            Err(StorageError::UnsupportedVersion { found: 2 })
        ));
    }

    #[tokio::test]
    async fn test_malformed_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("heating_oil_level.storage_d"), "not json").unwrap();

        let store: JsonStore<Reading> = JsonStore::new(dir.path(), "heating_oil_level.storage_d");

        assert!(matches!(store.load().await, Err(StorageError::Malformed(_))));
    }
}
