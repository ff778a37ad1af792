use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_api_base_url() -> String {
    "http://localhost:8080/api".into()
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Layouts are only persisted remotely once a user is known.
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub debug_logging: bool,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            user_id: None,
            cache_path: None,
            request_timeout_secs: default_request_timeout(),
            debug_logging: false,
            log_file: None,
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).unwrap_or_default();
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Configured cache file, else `results_dashboard/cache.json` under the
    /// platform data directory, else the working directory.
    pub fn cache_file(&self) -> PathBuf {
        if let Some(path) = &self.cache_path {
            return path.clone();
        }
        dirs_next::data_dir()
            .map(|dir| dir.join("results_dashboard").join("cache.json"))
            .unwrap_or_else(|| PathBuf::from("results_dashboard_cache.json"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
