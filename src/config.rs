//! Configuration system.
//!
//! Layered: runtime defaults, then an optional TOML file, then
//! `CLAUDE_SCOPE_*` environment overrides, then validation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub processing: ProcessingConfig,
    pub blocks: BlocksConfig,
    pub live: LiveConfig,
    pub status: StatusConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json".
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Files per parallel parse chunk in batch mode.
    pub batch_size: usize,
    /// Concurrent file reads per live refresh tick.
    pub read_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlocksConfig {
    /// Billing window length.
    pub duration_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    pub refresh_interval_secs: u64,
    /// Maximum age of retained entries.
    pub retention_hours: i64,
    /// Evicting at least this fraction of the buffer in one pass clears
    /// the dedup set.
    pub dedup_clear_ratio: f64,
    /// Never fetch pricing over the network.
    pub offline: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    pub refresh_interval_secs: u64,
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Log roots; a root qualifies when it contains `projects/`.
    pub roots: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            logging: LoggingConfig {
                level: "error".to_string(),
                format: "pretty".to_string(),
            },
            processing: ProcessingConfig {
                batch_size: 10,
                read_concurrency: 5,
            },
            blocks: BlocksConfig { duration_hours: 5 },
            live: LiveConfig {
                refresh_interval_secs: 3,
                retention_hours: 24,
                dedup_clear_ratio: 0.5,
                offline: false,
            },
            status: StatusConfig {
                refresh_interval_secs: 10,
                cache_dir: env::temp_dir().join("claude-scope-status"),
            },
            paths: PathsConfig {
                roots: vec![home.join(".claude"), home.join(".config").join("claude")],
            },
        }
    }
}

impl Config {
    /// Load configuration from file, environment, and defaults.
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        let config_paths = [
            PathBuf::from("claude-scope.toml"),
            dirs::config_dir()
                .map(|d| d.join("claude-scope").join("config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if path.exists() {
                info!(config_file = %path.display(), "Loading configuration from file");
                config = Self::load_from_file(path)?;
                break;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = env::var("CLAUDE_SCOPE_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = env::var("CLAUDE_SCOPE_LOG_FORMAT") {
            self.logging.format = val;
        }
        if let Ok(val) = env::var("CLAUDE_SCOPE_BATCH_SIZE") {
            self.processing.batch_size = val.parse().context("Invalid CLAUDE_SCOPE_BATCH_SIZE")?;
        }
        if let Ok(val) = env::var("CLAUDE_SCOPE_READ_CONCURRENCY") {
            self.processing.read_concurrency =
                val.parse().context("Invalid CLAUDE_SCOPE_READ_CONCURRENCY")?;
        }
        if let Ok(val) = env::var("CLAUDE_SCOPE_BLOCK_HOURS") {
            self.blocks.duration_hours = val.parse().context("Invalid CLAUDE_SCOPE_BLOCK_HOURS")?;
        }
        if let Ok(val) = env::var("CLAUDE_SCOPE_RETENTION_HOURS") {
            self.live.retention_hours =
                val.parse().context("Invalid CLAUDE_SCOPE_RETENTION_HOURS")?;
        }
        if let Ok(val) = env::var("CLAUDE_SCOPE_OFFLINE") {
            self.live.offline = val.parse().context("Invalid CLAUDE_SCOPE_OFFLINE")?;
        }
        if let Ok(val) = env::var("CLAUDE_SCOPE_STATUS_CACHE_DIR") {
            self.status.cache_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("CLAUDE_SCOPE_ROOTS") {
            self.paths.roots = env::split_paths(&val).collect();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.processing.batch_size == 0 {
            anyhow::bail!("Batch size must be greater than 0");
        }
        if self.processing.read_concurrency == 0 {
            anyhow::bail!("Read concurrency must be greater than 0");
        }
        if self.blocks.duration_hours <= 0 {
            anyhow::bail!("Block duration must be positive");
        }
        if self.live.retention_hours <= 0 {
            anyhow::bail!("Retention window must be positive");
        }
        if !(self.live.dedup_clear_ratio > 0.0 && self.live.dedup_clear_ratio <= 1.0) {
            anyhow::bail!(
                "Dedup clear ratio must be in (0, 1], got {}",
                self.live.dedup_clear_ratio
            );
        }
        if self.paths.roots.is_empty() {
            anyhow::bail!("At least one log root must be configured");
        }
        Ok(())
    }
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Global configuration instance, loaded once per process.
pub fn get_config() -> &'static Config {
    CONFIG.get_or_init(|| match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            std::process::exit(2);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.processing.read_concurrency, 5);
        assert_eq!(config.blocks.duration_hours, 5);
        assert_eq!(config.live.retention_hours, 24);
    }

    #[test]
    fn env_override_roots() {
        env::set_var("CLAUDE_SCOPE_ROOTS", "/tmp/a:/tmp/b");
        let mut config = Config::default();
        config.apply_env_overrides().unwrap();
        assert_eq!(config.paths.roots.len(), 2);
        env::remove_var("CLAUDE_SCOPE_ROOTS");
    }

    #[test]
    fn zero_concurrency_rejected() {
        let mut config = Config::default();
        config.processing.read_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_clear_ratio_rejected() {
        let mut config = Config::default();
        config.live.dedup_clear_ratio = 1.5;
        assert!(config.validate().is_err());
    }
}
