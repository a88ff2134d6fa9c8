//! Unified error type for the forecast bot.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("External fetch failed: {0}")]
    ExternalFetch(String),

    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("No outcome recorded yet for {0}")]
    VerificationGap(String),

    #[error("Retention conflict: {0}")]
    RetentionConflict(String),

    #[error("Weight normalization error: {0}")]
    WeightNormalization(String),

    #[error("Weight store version conflict (expected={expected}, found={found})")]
    VersionConflict { expected: u64, found: u64 },

    #[error("Store corrupted: {0}")]
    StoreCorrupted(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Fatal errors halt the whole cycle and need manual intervention.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::StoreCorrupted(_) | Error::Config(_))
    }
}
