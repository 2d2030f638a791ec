use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};

pub const ITEMS_KEY: &str = "taskManagerItems";
pub const CATEGORIES_KEY: &str = "taskManagerCategories";
pub const TAG_SETTINGS_KEY: &str = "footholdTagSettings";
pub const SHOW_COUNTS_KEY: &str = "footholdShowCounts";
pub const THEME_KEY: &str = "theme";
pub const LAST_DELETED_KEY: &str = "footholdLastDeleted";

/// Key-value persistence. Values are JSON documents.
pub trait Storage {
    fn load(&self, key: &str) -> anyhow::Result<Option<Value>>;
    fn save(&mut self, key: &str, value: &Value) -> anyhow::Result<()>;
    fn remove(&mut self, key: &str) -> anyhow::Result<()>;
}

/// Loads and decodes `key`. A value that does not match `T` is an error
/// naming the key, not a silent default.
pub fn load_typed<T: DeserializeOwned>(
    storage: &(impl Storage + ?Sized),
    key: &str,
) -> anyhow::Result<Option<T>> {
    let Some(raw) = storage.load(key)? else {
        return Ok(None);
    };
    let value = serde_json::from_value(raw)
        .with_context(|| format!("stored value for {key} is malformed"))?;
    Ok(Some(value))
}

pub fn save_typed<T: Serialize + ?Sized>(
    storage: &mut (impl Storage + ?Sized),
    key: &str,
    value: &T,
) -> anyhow::Result<()> {
    let raw = serde_json::to_value(value)
        .with_context(|| format!("failed to encode value for {key}"))?;
    storage.save(key, &raw)
}

/// One `<key>.json` file per key inside a data directory.
#[derive(Debug)]
pub struct JsonFileStore {
    pub data_dir: PathBuf,
}

impl JsonFileStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened datastore");
        Ok(Self { data_dir })
    }

    pub fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(anyhow!("invalid storage key: {key:?}"));
        }
        Ok(self.data_dir.join(format!("{key}.json")))
    }
}

impl Storage for JsonFileStore {
    #[tracing::instrument(skip(self))]
    fn load(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            debug!(file = %path.display(), "no stored value");
            return Ok(None);
        }

        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        let value = serde_json::from_str(&text)
            .with_context(|| format!("failed parsing {}", path.display()))?;
        Ok(Some(value))
    }

    #[tracing::instrument(skip(self, value))]
    fn save(&mut self, key: &str, value: &Value) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        debug!(file = %path.display(), "saving json atomically");

        let mut temp = NamedTempFile::new_in(&self.data_dir)?;
        serde_json::to_writer_pretty(&mut temp, value)?;
        writeln!(temp)?;
        temp.flush()?;

        temp.persist(&path)
            .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed removing {}", path.display()))?;
        }
        Ok(())
    }
}

/// In-process store for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }
}

impl Storage for MemoryStore {
    fn load(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.entries.get(key).cloned())
    }

    fn save(&mut self, key: &str, value: &Value) -> anyhow::Result<()> {
        self.entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
