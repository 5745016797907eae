// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the CodeWeaver search core.
//!
//! Each subsystem gets its own `thiserror` enum; everything that crosses the
//! crate boundary maps onto a stable [`ErrorKind`] so transports can match on
//! kinds without depending on enum shapes. Variants that have an obvious
//! operator action expose it through `remediation()`.

use thiserror::Error;

/// Stable error kinds surfaced at the crate boundary.
///
/// The string form of these tags is part of the response contract and must
/// not change between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ProviderUnavailable,
    ProviderSwitch,
    DimensionMismatch,
    TimedOut,
    IndexBusy,
    NotReady,
    BadQuery,
    RateLimited,
    Network,
    Data,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProviderUnavailable => "provider_unavailable",
            Self::ProviderSwitch => "provider_switch",
            Self::DimensionMismatch => "dimension_mismatch",
            Self::TimedOut => "timed_out",
            Self::IndexBusy => "index_busy",
            Self::NotReady => "not_ready",
            Self::BadQuery => "bad_query",
            Self::RateLimited => "rate_limited",
            Self::Network => "network",
            Self::Data => "data",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors raised by embedding and reranking providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider '{variant}' unavailable: missing configuration {missing:?}")]
    Unavailable {
        variant: String,
        missing: Vec<String>,
    },

    #[error("provider not configured: {0}")]
    NotConfigured(String),

    #[error("API error: {message}")]
    Api {
        message: String,
        status_code: Option<u16>,
    },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("response parsing error: {0}")]
    Parse(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("timed out after {0}ms")]
    Timeout(u64),
}

impl ProviderError {
    /// Create an API error with status code.
    pub fn api(message: impl Into<String>, status_code: u16) -> Self {
        Self::Api {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// Transient failures that the pipeline retries with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Network(_) | Self::Timeout(_)
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable { .. } | Self::NotConfigured(_) => ErrorKind::ProviderUnavailable,
            Self::Api { .. } | Self::Parse(_) => ErrorKind::Internal,
            Self::RateLimited(_) => ErrorKind::RateLimited,
            Self::Network(_) => ErrorKind::Network,
            Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Self::Timeout(_) => ErrorKind::TimedOut,
        }
    }

    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::Unavailable { variant, missing } => Some(format!(
                "set {} for provider '{}' or select a different variant",
                missing.join(", "),
                variant
            )),
            Self::DimensionMismatch { expected, .. } => Some(format!(
                "re-index the collection or select a model that emits {expected}-dimensional vectors"
            )),
            _ => None,
        }
    }
}

/// Errors raised by vector store backends.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(
        "collection '{collection}' was created by provider '{existing}' but '{desired}' is configured"
    )]
    ProviderSwitch {
        collection: String,
        existing: String,
        desired: String,
    },

    #[error("dense dimension mismatch in '{collection}': stored {stored}, configured {configured}")]
    DimensionMismatch {
        collection: String,
        stored: usize,
        configured: usize,
    },

    #[error("collection not found: {0}")]
    CollectionMissing(String),

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Timeout(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProviderSwitch { .. } => ErrorKind::ProviderSwitch,
            Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Self::CollectionMissing(_) => ErrorKind::NotReady,
            Self::InvalidChunk(_) => ErrorKind::Data,
            Self::Snapshot(_) | Self::Backend(_) => ErrorKind::Internal,
            Self::Timeout(_) => ErrorKind::TimedOut,
        }
    }

    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::ProviderSwitch {
                existing, desired, ..
            } => Some(format!(
                "re-index the collection under '{desired}', or revert the configuration to '{existing}'"
            )),
            Self::DimensionMismatch { stored, .. } => Some(format!(
                "re-index the collection or configure an embedder with dimension {stored}"
            )),
            _ => None,
        }
    }
}

/// Errors raised while building or updating an index.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("an indexing operation is already running for this collection")]
    Busy,

    #[error("indexing cancelled")]
    Cancelled,

    #[error("data error in {path}: {message}")]
    Data { path: String, message: String },

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl IndexError {
    pub fn data(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Data {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Busy => ErrorKind::IndexBusy,
            Self::Cancelled => ErrorKind::Internal,
            Self::Data { .. } => ErrorKind::Data,
            Self::Checkpoint(_) | Self::Io(_) => ErrorKind::Internal,
            Self::Store(e) => e.kind(),
            Self::Provider(e) => e.kind(),
        }
    }
}

impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors raised by the query pipeline.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("bad query: {0}")]
    BadQuery(String),

    #[error("index not ready: {0}")]
    NotReady(String),

    #[error("search timed out after {0}ms")]
    Timeout(u64),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadQuery(_) => ErrorKind::BadQuery,
            Self::NotReady(_) => ErrorKind::NotReady,
            Self::Timeout(_) => ErrorKind::TimedOut,
            Self::Store(e) => e.kind(),
            Self::Provider(e) => e.kind(),
        }
    }
}

/// Result type alias using anyhow for flexible error handling at the edges.
pub type Result<T> = anyhow::Result<T>;
