//! Error taxonomy for the sync pipeline.
//!
//! Remote failures arrive as [`StoreError`] and carry a [`StoreErrorKind`]
//! classification made by the store client. The retry layer only absorbs
//! [`StoreErrorKind::Transient`] failures; everything else reaches the
//! orchestrator untouched, which turns it into a run-terminating [`SyncError`].

use std::fmt;

use thiserror::Error;

/// How the remote store signalled a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Timeouts, throttling, 5xx. Worth another attempt.
    Transient,
    /// The store ran out of a metered resource (memory, cycles, quota).
    Capacity,
    /// The key already exists with conflicting metadata.
    Conflict,
    /// The call was understood and refused; retrying will not help.
    Rejected,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoreErrorKind::Transient => "transient",
            StoreErrorKind::Capacity => "capacity",
            StoreErrorKind::Conflict => "conflict",
            StoreErrorKind::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// A failed call against the asset store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} store error: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Transient, message)
    }

    pub fn capacity(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Capacity, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Conflict, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Rejected, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == StoreErrorKind::Transient
    }
}

/// Failure to resolve the bytes of a source location.
///
/// `Clone` so one failed fetch can be handed to every caller coalesced onto it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("invalid source location {location:?}: {reason}")]
    InvalidLocation { location: String, reason: String },

    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },
}

/// Why a batch session stopped before committing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("session cancelled")]
    Cancelled,
}

/// Terminal error of a sync run. The first unrecoverable item ends the run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to list assets already in the store: {0}")]
    Snapshot(#[source] StoreError),

    #[error("failed to fetch content for item {item}: {source}")]
    Fetch { item: String, source: FetchError },

    #[error("asset store out of capacity while syncing item {item}: {source}")]
    Capacity { item: String, source: StoreError },

    #[error("asset {key} already exists (item {item}): {source}")]
    Conflict {
        item: String,
        key: String,
        source: StoreError,
    },

    #[error("failed to sync item {item}: {source}")]
    ItemFailed { item: String, source: StoreError },

    #[error("sync cancelled while processing item {item}")]
    Cancelled { item: String },
}

impl SyncError {
    /// The id of the item the run stopped at, when the failure was item-specific.
    pub fn item(&self) -> Option<&str> {
        match self {
            SyncError::Snapshot(_) => None,
            SyncError::Fetch { item, .. }
            | SyncError::Capacity { item, .. }
            | SyncError::Conflict { item, .. }
            | SyncError::ItemFailed { item, .. }
            | SyncError::Cancelled { item } => Some(item),
        }
    }
}

/// Invalid sync settings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("chunk_size must be between 1 and {max} bytes, got {got}")]
    ChunkSize { got: usize, max: usize },

    #[error("max_chunks_per_batch must be at least 1")]
    MaxChunksPerBatch,

    #[error("retry.max_attempts must be at least 1")]
    MaxAttempts,

    #[error("retry.max_attempts must be at most {max}, got {got}")]
    TooManyAttempts { got: u32, max: u32 },

    #[error("retry.backoff_factor must be a finite number >= 1.0, got {0}")]
    BackoffFactor(f64),
}
