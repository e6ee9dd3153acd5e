//! Library error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BinError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot build the scan thread pool: {0}")]
    ThreadPool(String),

    #[error("scan interval size ({computed:#x}) exceeds the configured ceiling ({ceiling:#x})")]
    ConfigViolation { computed: u64, ceiling: u64 },

    #[error("{plugin}: parse failed: {reason}")]
    Parse {
        plugin: &'static str,
        reason: String,
    },

    #[error("{plugin}: extraction failed: {reason}")]
    Extract {
        plugin: &'static str,
        reason: String,
    },

    #[error("hash pipeline error: {0}")]
    Digest(String),
}

pub type Result<T> = std::result::Result<T, BinError>;
