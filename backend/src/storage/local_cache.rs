//! # Local Cache
//!
//! Small key/value cache kept on the client side of a session. It holds the
//! `payment_session` marker while a payment is open, survives a reload when
//! file-backed, and is wiped on logout.
//!
//! `FileCache` keeps every entry in one YAML map:
//!
//! ```yaml
//! payment_session: '{"student_id":"...","expires_at":"...","weeks":[1,2],"total_amount":10000}'
//! ```

use anyhow::Result;
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

pub trait LocalCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Returns whether the key was present
    fn remove(&self, key: &str) -> Result<bool>;

    /// Drop every entry (logout)
    fn clear(&self) -> Result<()>;
}

/// YAML-file backed cache
pub struct FileCache {
    path: PathBuf,
    // Serialises read-modify-write cycles on the file
    lock: Mutex<()>,
}

impl FileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let yaml_content = fs::read_to_string(&self.path)?;
        if yaml_content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_yaml::from_str(&yaml_content)?)
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                info!("Created cache directory: {:?}", parent);
            }
        }

        let yaml_content = serde_yaml::to_string(entries)?;

        // Write to a temp file, then rename over the real one
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, yaml_content)?;
        fs::rename(&temp_path, &self.path)?;

        debug!("Saved local cache to {:?}", self.path);
        Ok(())
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> (T, bool)) -> Result<T> {
        let _guard = self.lock.lock().map_err(|_| anyhow::anyhow!("Local cache lock poisoned"))?;
        let mut entries = self.load()?;
        let (result, dirty) = f(&mut entries);
        if dirty {
            self.save(&entries)?;
        }
        Ok(result)
    }
}

impl LocalCache for FileCache {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_entries(|entries| (entries.get(key).cloned(), false))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_entries(|entries| {
            entries.insert(key.to_string(), value.to_string());
            ((), true)
        })
    }

    fn remove(&self, key: &str) -> Result<bool> {
        self.with_entries(|entries| {
            let removed = entries.remove(key).is_some();
            (removed, removed)
        })
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow::anyhow!("Local cache lock poisoned"))?;
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            info!("Cleared local cache at {:?}", self.path);
        }
        Ok(())
    }
}

/// In-process cache for tests and headless runs
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("Local cache lock poisoned"))
    }
}

impl LocalCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.entries()?.remove(key).is_some())
    }

    fn clear(&self) -> Result<()> {
        self.entries()?.clear();
        Ok(())
    }
}
