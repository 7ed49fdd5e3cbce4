//! Error types for rampload
//!
//! Request outcomes are never errors: a failed or timed-out request is a
//! metric sample. These variants cover everything that stops a run from
//! starting or its results from being written.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadTestError {
    /// CLI values that parse but make no sense together
    #[error("Configuration error: {0}")]
    Config(String),

    /// Preflight TCP connect to the target host failed
    #[error("Failed to reach {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP client error: {0}")]
    Http(#[from] isahc::Error),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to write {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, LoadTestError>;

impl LoadTestError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        LoadTestError::Config(msg.into())
    }
}
