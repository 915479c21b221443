//! Error types for kbchat.
//!
//! Each component has its own `thiserror` enum. Command-level code wraps
//! these in `anyhow` with context.

use std::path::PathBuf;
use thiserror::Error;

/// Knowledge base errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid document name: {0:?}")]
    InvalidName(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("no text could be extracted from {0}")]
    EmptyDocument(PathBuf),

    #[error(transparent)]
    Extract(#[from] ExtractError),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Text extraction errors for binary documents.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// Chat request errors.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("no API key configured (set it with `kbchat settings set api_key <KEY>` or {env})", env = crate::config::API_KEY_ENV)]
    MissingApiKey,

    #[error("a request is already in flight")]
    Busy,

    #[error("API returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to decode API response: {0}")]
    Decode(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("no request in flight")]
    Idle,

    #[error("request task failed: {0}")]
    TaskFailed(String),

    #[error("no conversation to summarize")]
    EmptyConversation,
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ChatError::Decode(e.to_string())
        } else {
            ChatError::Network(e.to_string())
        }
    }
}

/// Export and snapshot reload errors.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid conversation snapshot: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown export format: {0} (expected markdown, html, or json)")]
    UnknownFormat(String),
}
