//! Configuration for the ledger

use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Address granted Admin when the ledger is opened
    #[serde(default)]
    pub admin: Option<String>,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Block production configuration
    pub block: BlockConfig,

    /// History read configuration
    pub history: HistoryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            service_name: "foodsafe-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            admin: None,
            rocksdb: RocksDBConfig::default(),
            block: BlockConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            target_file_size_mb: 64,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Block production configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockConfig {
    /// Seal a block once it holds this many transactions
    pub max_transactions: usize,

    /// Seal a non-empty block after this long (milliseconds)
    pub interval_ms: u64,

    /// When false every transaction is sealed into its own block
    pub enabled: bool,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            max_transactions: 100,
            interval_ms: 2_000,
            enabled: true,
        }
    }
}

/// History read configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Largest page returned by a paginated history read
    pub max_page_size: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_page_size: 500 }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(admin) = std::env::var("LEDGER_ADMIN") {
            config.admin = Some(admin);
        }

        if let Ok(interval) = std::env::var("LEDGER_BLOCK_INTERVAL_MS") {
            config.block.interval_ms = interval.parse().map_err(|e| {
                crate::Error::Config(format!("LEDGER_BLOCK_INTERVAL_MS: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Admin address, if configured
    pub fn admin_address(&self) -> Option<Address> {
        self.admin
            .as_deref()
            .map(Address::new)
            .filter(|a| !a.is_empty())
    }

    /// Check value ranges
    pub fn validate(&self) -> crate::Result<()> {
        if self.block.max_transactions == 0 {
            return Err(crate::Error::Config(
                "block.max_transactions must be at least 1".to_string(),
            ));
        }
        if self.block.enabled && self.block.interval_ms == 0 {
            return Err(crate::Error::Config(
                "block.interval_ms must be positive".to_string(),
            ));
        }
        if self.history.max_page_size == 0 {
            return Err(crate::Error::Config(
                "history.max_page_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
