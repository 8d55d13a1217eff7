use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarvestError>;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Unidentifiable unit: {0}")]
    UnidentifiableUnit(String),

    #[error("Corrupt persisted line {line}: {reason}")]
    CorruptLine { line: usize, reason: String },

    #[error("Store write failed for {}: {source}", path.display())]
    StoreWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Failures surfaced by a `Fetcher` implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Timeout or rendering hiccup. Worth retrying at the same position.
    #[error("Transient fetch failure: {0}")]
    Transient(String),

    #[error("Not supported by this fetcher: {0}")]
    Unsupported(&'static str),

    #[error("Fetch failed: {0}")]
    Fatal(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}
