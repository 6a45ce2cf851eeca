use std::path::PathBuf;

use thiserror::Error;

/// Failures of the external Translate capability.
///
/// These never abort a chapter: the resolver turns them into error-tagged
/// segment results.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("api key not set (env {env})")]
    MissingApiKey { env: String },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("translate service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed translate response: {0}")]
    Malformed(String),

    #[error("cancelled")]
    Cancelled,

    #[error("translate service unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the translation memory store or its similarity index.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("memory storage io ({}): {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("memory storage corrupt ({}): {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialize memory: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("memory lock poisoned")]
    Poisoned,

    #[error("similarity index: {0}")]
    Index(String),
}

/// Failures while loading static reference data.
#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("read reference data ({}): {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse reference data: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("alias {alias:?} is claimed by both {first} and {second}")]
    AmbiguousAlias {
        alias: String,
        first: String,
        second: String,
    },

    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}
