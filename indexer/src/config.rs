use config::{builder::DefaultState, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexerConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ledger: LedgerSourceConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Where the in-process ledger lives
#[derive(Debug, Default, Deserialize, Serialize, Clone)]
pub struct LedgerSourceConfig {
    /// Ledger TOML file; `LEDGER_*` environment variables are used when absent
    pub config_file: Option<String>,
    /// Overrides the ledger's data directory
    pub data_dir: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// First block to index on a fresh projection
    pub start_block: u64,
    /// Maximum blocks per window
    pub window_size: u64,
    /// Blocks kept back from the head
    pub confirmations: u64,
    pub poll_interval_ms: u64,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            start_block: 1,
            window_size: 2000,
            confirmations: 2,
            poll_interval_ms: 5000,
            retry_initial_ms: 500,
            retry_max_ms: 60_000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
    pub json: bool,
}

impl IndexerConfig {
    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let sync = SyncConfig::default();

        config::Config::builder()
            // Database defaults
            .set_default("database.url", "sqlite://data/projection.db")?
            .set_default("database.max_connections", 5)?
            // Sync defaults
            .set_default("sync.start_block", sync.start_block)?
            .set_default("sync.window_size", sync.window_size)?
            .set_default("sync.confirmations", sync.confirmations)?
            .set_default("sync.poll_interval_ms", sync.poll_interval_ms)?
            .set_default("sync.retry_initial_ms", sync.retry_initial_ms)?
            .set_default("sync.retry_max_ms", sync.retry_max_ms)?
            // Logging defaults
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = Self::defaults()?;

        // Add environment-specific config file if it exists
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        // Override with environment variables
        builder = builder.add_source(Environment::with_prefix("INDEXER").separator("__"));

        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", db_url)?;
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults layered under a single required file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config: Self = Self::defaults()?
            .add_source(File::with_name(path).required(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.is_empty() {
            return Err(ConfigError::Message("Database URL is required".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Message(
                "database.max_connections must be at least 1".to_string(),
            ));
        }

        if self.sync.start_block == 0 {
            return Err(ConfigError::Message(
                "sync.start_block must be at least 1 (block 0 is genesis)".to_string(),
            ));
        }

        if self.sync.window_size == 0 {
            return Err(ConfigError::Message(
                "sync.window_size must be at least 1".to_string(),
            ));
        }

        if self.sync.retry_initial_ms == 0 || self.sync.retry_initial_ms > self.sync.retry_max_ms {
            return Err(ConfigError::Message(
                "sync.retry_initial_ms must be positive and not exceed sync.retry_max_ms"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_layered_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indexer.toml");
        std::fs::write(
            &path,
            r#"
[database]
url = "sqlite::memory:"

[sync]
window_size = 50
confirmations = 0
"#,
        )
        .unwrap();

        let config = IndexerConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.sync.window_size, 50);
        assert_eq!(config.sync.confirmations, 0);
        assert_eq!(config.sync.start_block, 1);
        assert_eq!(config.sync.poll_interval(), Duration::from_secs(5));
        assert!(config.ledger.config_file.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[sync]\nwindow_size = 0\n").unwrap();

        let err = IndexerConfig::from_file(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("window_size"));
    }
}
