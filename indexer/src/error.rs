use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] foodsafe_ledger::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl IndexerError {
    /// I/O failures that are expected to clear up on retry
    pub fn is_transient(&self) -> bool {
        match self {
            IndexerError::Ledger(e) => e.is_transient(),
            IndexerError::Database(_) => true,
            IndexerError::Decode(_)
            | IndexerError::Consistency(_)
            | IndexerError::Config(_)
            | IndexerError::Metrics(_) => false,
        }
    }

    /// Projection state disagrees with the log
    pub fn is_consistency(&self) -> bool {
        matches!(self, IndexerError::Consistency(_))
    }

    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            IndexerError::Ledger(_) => "ledger",
            IndexerError::Database(_) => "database",
            IndexerError::Decode(_) => "decode",
            IndexerError::Consistency(_) => "consistency",
            IndexerError::Config(_) => "config",
            IndexerError::Metrics(_) => "metrics",
        }
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        IndexerError::Decode(format!("payload encoding: {}", e))
    }
}
