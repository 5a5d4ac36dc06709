use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed document; the document is skipped.
    #[error("failed to parse {location}: {reason}")]
    Parse { location: String, reason: String },

    #[error("write for {location} timed out after {timeout:?}")]
    WriteTimeout { location: String, timeout: Duration },

    #[error("write for {location} failed: {reason}")]
    WriteFailure { location: String, reason: String },

    /// Query lemma absent from the store. Scored as zero weight, never surfaced.
    #[error("term not in index: {0}")]
    MissingTerm(String),

    #[error("no url for document {0}")]
    Resolution(String),

    /// Fatal: there is nothing to index without a manifest.
    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] sled::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("blocking store task failed: {0}")]
    Task(String),
}

impl Error {
    pub fn write_failure(location: impl Into<String>, reason: impl ToString) -> Self {
        Error::WriteFailure { location: location.into(), reason: reason.to_string() }
    }

    pub fn parse(location: impl Into<String>, reason: impl ToString) -> Self {
        Error::Parse { location: location.into(), reason: reason.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
