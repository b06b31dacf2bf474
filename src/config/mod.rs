// src/config/mod.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const ENV_PATH: &str = "SYNC_CONFIG_PATH";

fn default_city() -> String {
    "Sydney".to_string()
}
fn default_interval_secs() -> u64 {
    300
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_model() -> String {
    crate::ingest::providers::gemini::DEFAULT_MODEL.to_string()
}
fn default_save_retries() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// City passed to the event source on scheduled runs.
    #[serde(default = "default_city")]
    pub city: String,
    /// Scheduler period; 0 disables the periodic trigger.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_model")]
    pub model: String,
    /// Reconcile an empty successful batch instead of skipping the run.
    #[serde(default)]
    pub allow_empty_batch: bool,
    /// Extra save attempts inside one run before reporting a persistence error.
    #[serde(default = "default_save_retries")]
    pub save_retries: u32,
    /// Never read from files; only from `GEMINI_API_KEY`.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            city: default_city(),
            interval_secs: default_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            data_dir: default_data_dir(),
            model: default_model(),
            allow_empty_batch: false,
            save_retries: default_save_retries(),
            api_key: None,
        }
    }
}

impl SyncConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading sync config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        parse_config(&content, &ext)
    }

    /// Load using env var + fallbacks, then apply env overrides:
    /// 1) $SYNC_CONFIG_PATH
    /// 2) config/sync.toml
    /// 3) config/sync.json
    /// 4) defaults
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("SYNC_CONFIG_PATH points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else if Path::new("config/sync.toml").exists() {
            Self::load_from(Path::new("config/sync.toml"))?
        } else if Path::new("config/sync.json").exists() {
            Self::load_from(Path::new("config/sync.json"))?
        } else {
            Self::default()
        };
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(city) = std::env::var("SYNC_CITY") {
            if !city.trim().is_empty() {
                self.city = city.trim().to_string();
            }
        }
        if let Some(secs) = std::env::var("SCRAPE_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.trim().parse().ok())
        {
            self.interval_secs = secs;
        }
        if let Ok(dir) = std::env::var("SYNC_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        self.api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        self.sanitize();
    }

    fn sanitize(&mut self) {
        if self.fetch_timeout_secs == 0 {
            self.fetch_timeout_secs = default_fetch_timeout_secs();
        }
        if self.city.trim().is_empty() {
            self.city = default_city();
        }
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<SyncConfig> {
    let mut cfg: SyncConfig = if hint_ext == "json" {
        serde_json::from_str(s).context("parsing sync config JSON")?
    } else {
        toml::from_str(s).context("parsing sync config TOML")?
    };
    cfg.sanitize();
    Ok(cfg)
}
