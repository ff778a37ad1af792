use crate::dashboard::lock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Single key under which the whole layout blob is cached.
pub const LAYOUT_CACHE_KEY: &str = "dashboard-layouts";

/// Durable string key-value storage mirrored by the layout store.
pub trait LocalCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// Non-durable cache, useful for sessions without a writable disk.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(key: &str, value: impl Into<String>) -> Self {
        let cache = Self::default();
        lock(&cache.entries).insert(key.to_string(), value.into());
        cache
    }
}

impl LocalCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// JSON file holding a flat string map.
pub struct FileCache {
    path: PathBuf,
    io: Mutex<()>,
}

impl FileCache {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            io: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> HashMap<String, String> {
        let content = std::fs::read_to_string(&self.path).unwrap_or_default();
        if content.trim().is_empty() {
            return HashMap::new();
        }
        match serde_json::from_str(&content) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "cache file unreadable, starting empty: {e}");
                HashMap::new()
            }
        }
    }

    fn write_map(&self, map: &HashMap<String, String>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(map)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl LocalCache for FileCache {
    fn get(&self, key: &str) -> Option<String> {
        let _io = lock(&self.io);
        self.read_map().remove(key)
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let _io = lock(&self.io);
        let mut map = self.read_map();
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let _io = lock(&self.io);
        let mut map = self.read_map();
        if map.remove(key).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_cache_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");
        FileCache::new(&path).set(LAYOUT_CACHE_KEY, "blob").unwrap();
        let reopened = FileCache::new(&path);
        assert_eq!(reopened.get(LAYOUT_CACHE_KEY).as_deref(), Some("blob"));
        reopened.remove(LAYOUT_CACHE_KEY).unwrap();
        assert_eq!(FileCache::new(&path).get(LAYOUT_CACHE_KEY), None);
    }

    #[test]
    fn corrupt_cache_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, b"not json").unwrap();
        let cache = FileCache::new(&path);
        assert_eq!(cache.get(LAYOUT_CACHE_KEY), None);
        cache.set(LAYOUT_CACHE_KEY, "fresh").unwrap();
        assert_eq!(cache.get(LAYOUT_CACHE_KEY).as_deref(), Some("fresh"));
    }
}
