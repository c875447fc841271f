//! # contract: the seams of the sync pipeline
//!
//! Everything the pipeline talks to but does not own is a trait in this module:
//!
//! - [`AssetStore`]: the batch-oriented write protocol of the destination store.
//! - [`SourceFetcher`]: resolves a source location to bytes.
//! - [`ProgressSink`]: receives progress snapshots; must not block.
//! - [`Sleeper`]: every deliberate pause (backoff, rate limiting) goes through it.
//!
//! ## Mocking & Testing
//! - Each trait is annotated for `mockall`; the mocks are exported behind the
//!   `test-export-mocks` feature so downstream crates can drive the pipeline
//!   deterministically in their own tests.
//!
//! ## Handles
//! Batch and chunk handles are issued by the store and are opaque. They are
//! plain identifiers ([`BatchId`], [`ChunkId`]) kept in ordered lists.

#![allow(unused)]

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mockall::{automock, predicate::*};
use serde::{Deserialize, Serialize};

use crate::error::{FetchError, StoreError};
use crate::progress::Progress;

/// Server-issued handle of an open write batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub u64);

/// Server-issued handle of one uploaded chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub u64);

/// Where the bytes of an asset come from.
#[derive(Debug, Clone)]
pub enum AssetSource {
    /// Fetched at sync time. `ipfs://` locations go through the configured gateway.
    Url(String),
    /// Supplied by the caller up front.
    Inline(Bytes),
}

/// One item to copy into the store.
#[derive(Debug, Clone)]
pub struct AssetDescriptor {
    pub id: String,
    pub source: AssetSource,
    /// Falls back to the fetched content type, then `application/octet-stream`.
    pub content_type: Option<String>,
}

impl AssetDescriptor {
    pub fn from_url(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: AssetSource::Url(url.into()),
            content_type: None,
        }
    }

    pub fn inline(id: impl Into<String>, bytes: impl Into<Bytes>, content_type: &str) -> Self {
        Self {
            id: id.into(),
            source: AssetSource::Inline(bytes.into()),
            content_type: Some(content_type.to_string()),
        }
    }

    /// The destination key. Store keys are absolute paths.
    pub fn key(&self) -> String {
        if self.id.starts_with('/') {
            self.id.clone()
        } else {
            format!("/{}", self.id)
        }
    }
}

/// Registers a logical asset before any bytes are uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateAssetRequest {
    pub key: String,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub allow_raw_access: bool,
    pub max_age: Option<u64>,
    pub enable_aliasing: bool,
}

/// The commit operation publishing uploaded chunks under a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetAssetContent {
    pub key: String,
    pub sha256: [u8; 32],
    pub chunk_ids: Vec<ChunkId>,
    pub content_encoding: String,
}

/// One entry of the store listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    pub key: String,
    pub content_type: String,
}

/// Bytes resolved from a source location.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// The write protocol of the destination asset store.
///
/// Nothing becomes visible to readers until [`AssetStore::commit_batch`] succeeds.
/// `delete_batch` and `delete_asset` exist for rollback only.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn create_asset(&self, req: CreateAssetRequest) -> Result<(), StoreError>;

    async fn create_batch(&self) -> Result<BatchId, StoreError>;

    /// Upload one bounded group of chunks. Returned handles are in the order of `content`.
    async fn create_chunks(
        &self,
        batch_id: BatchId,
        content: Vec<Bytes>,
    ) -> Result<Vec<ChunkId>, StoreError>;

    async fn commit_batch(&self, batch_id: BatchId, op: SetAssetContent)
        -> Result<(), StoreError>;

    async fn delete_batch(&self, batch_id: BatchId) -> Result<(), StoreError>;

    async fn delete_asset(&self, key: String) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<AssetEntry>, StoreError>;
}

/// Resolves a source location into bytes.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, location: &str) -> Result<Fetched, FetchError>;
}

/// Receives a snapshot after every progress change.
///
/// Called inline by the orchestrator; an implementation that blocks stalls the run.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: &Progress);
}

/// Deliberate pauses: retry backoff and rate limiting between chunk groups.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
