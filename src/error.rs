//! Error types for dist-tracker.
//!
//! None of these ever reach the host UI. Fire-and-forget edges log and drop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("ingestion rejected event with status {status}")]
    Status { status: u16 },

    #[error("no active visit for {0}")]
    MissingCorrelation(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("bad manifest: {0}")]
    Manifest(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
