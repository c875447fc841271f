//! High-level pipeline: copies a queue of assets into the asset store, one at a time.
//!
//! For every [`AssetDescriptor`] not already in the store this module
//!   - resolves the bytes (fetch or inline),
//!   - runs one [`BatchSession`] (create asset, open batch, upload chunk groups, commit),
//!   - reports progress to the injected [`ProgressSink`],
//!   - and stops the whole run at the first unrecoverable item, after rolling that item back.
//!
//! # Responsibilities
//! - Fail-fast orchestration: a failed item ends the run. Items committed earlier
//!   in the same run stay committed; there is no cross-item rollback.
//! - Skip rule: keys present in the start-of-run snapshot are not uploaded but
//!   still count as completed.
//!
//! # Concurrency
//! Items and chunk groups are processed strictly sequentially. The snapshot is
//! taken once per run, so two runs against the same store must not overlap;
//! callers are responsible for serialising them.
//!
//! # Navigation
//! - Main entrypoints: [`Synchroniser::snapshot`], [`Synchroniser::run`], [`synchronise`]
//! - Supporting types: [`PresentSnapshot`], [`SyncReport`]

use std::collections::HashSet;

use bytes::Bytes;
use serde::Serialize;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::contract::{AssetDescriptor, AssetSource, AssetStore, ProgressSink, Sleeper, SourceFetcher, TokioSleeper};
use crate::error::{SessionError, StoreErrorKind, SyncError};
use crate::hasher;
use crate::progress::{milestone, Progress, TracingProgressSink};
pub use crate::session::CancellationFlag;
use crate::session::{BatchSession, UploadSession};

/// Content type used when neither the descriptor nor the source provides one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Keys already present in the store when the run started.
#[derive(Debug, Clone, Default)]
pub struct PresentSnapshot {
    keys: HashSet<String>,
}

impl PresentSnapshot {
    pub fn from_keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Debug, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub uploaded: Vec<UploadedAsset>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadedAsset {
    pub item_id: String,
    pub key: String,
    pub content_type: String,
    pub byte_len: usize,
    pub chunk_count: usize,
    pub chunk_groups: usize,
    pub digest: String,
}

impl UploadedAsset {
    fn from_session(item_id: &str, content_type: &str, upload: &UploadSession) -> Self {
        Self {
            item_id: item_id.to_string(),
            key: upload.asset_key.clone(),
            content_type: content_type.to_string(),
            byte_len: upload.byte_len,
            chunk_count: upload.chunk_ids.len(),
            chunk_groups: upload.chunk_groups,
            digest: upload
                .digest
                .as_ref()
                .map(hasher::digest_hex)
                .unwrap_or_default(),
        }
    }
}

/// Drives sync runs against one store.
pub struct Synchroniser<'a, S: ?Sized, F: ?Sized> {
    store: &'a S,
    fetcher: &'a F,
    config: &'a SessionConfig,
    sink: &'a dyn ProgressSink,
    sleeper: &'a dyn Sleeper,
    cancel: Option<&'a CancellationFlag>,
}

impl<'a, S, F> Synchroniser<'a, S, F>
where
    S: AssetStore + ?Sized,
    F: SourceFetcher + ?Sized,
{
    /// Progress goes to tracing and pauses use the tokio timer unless overridden.
    pub fn new(store: &'a S, fetcher: &'a F, config: &'a SessionConfig) -> Self {
        Self {
            store,
            fetcher,
            config,
            sink: &TracingProgressSink,
            sleeper: &TokioSleeper,
            cancel: None,
        }
    }

    pub fn with_progress(mut self, sink: &'a dyn ProgressSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_sleeper(mut self, sleeper: &'a dyn Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_cancellation(mut self, cancel: &'a CancellationFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Read the store listing once, for use as the run's skip set.
    pub async fn snapshot(&self) -> Result<PresentSnapshot, SyncError> {
        let store = self.store;
        let entries = self
            .config
            .retry
            .run("list", self.sleeper, || store.list())
            .await
            .map_err(|e| {
                error!(error = %e, "[SYNC][ERROR] Failed to list existing assets");
                SyncError::Snapshot(e)
            })?;
        info!(present = entries.len(), "[SYNC] Snapshot of existing assets taken");
        Ok(PresentSnapshot::from_keys(entries.into_iter().map(|e| e.key)))
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancellationFlag::is_cancelled)
    }

    /// Sync `descriptors` in order, skipping keys in `present`.
    pub async fn run(
        &self,
        descriptors: &[AssetDescriptor],
        present: &PresentSnapshot,
    ) -> Result<SyncReport, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync", %run_id, items = descriptors.len());
        self.run_inner(run_id, descriptors, present)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        descriptors: &[AssetDescriptor],
        present: &PresentSnapshot,
    ) -> Result<SyncReport, SyncError> {
        info!(items = descriptors.len(), present = present.len(), "[SYNC] Starting asset synchronisation");

        let mut progress = Progress {
            total_items: descriptors.len(),
            ..Progress::default()
        };
        let mut report = SyncReport {
            run_id,
            uploaded: Vec::new(),
            skipped: Vec::new(),
        };

        for descriptor in descriptors {
            let key = descriptor.key();
            progress.current_item = Some(descriptor.id.clone());

            if present.contains(&key) {
                info!(item = %descriptor.id, %key, "[SYNC] Already present, skipping");
                progress.current_item_percent = milestone::COMMITTED;
                progress.total_completed += 1;
                self.sink.on_progress(&progress);
                report.skipped.push(key);
                continue;
            }

            progress.current_item_percent = 0;
            self.sink.on_progress(&progress);
            progress.current_item_percent = milestone::SELECTED;
            self.sink.on_progress(&progress);

            let uploaded = self.sync_item(descriptor, key, &mut progress).await?;

            progress.current_item_percent = milestone::COMMITTED;
            progress.total_completed += 1;
            self.sink.on_progress(&progress);
            report.uploaded.push(uploaded);
        }

        info!(
            uploaded = report.uploaded.len(),
            skipped = report.skipped.len(),
            "[SYNC] Synchronisation complete"
        );
        Ok(report)
    }

    async fn sync_item(
        &self,
        descriptor: &AssetDescriptor,
        key: String,
        progress: &mut Progress,
    ) -> Result<UploadedAsset, SyncError> {
        let item = descriptor.id.clone();

        if self.is_cancelled() {
            return Err(SyncError::Cancelled { item });
        }
        let (fetched_type, content) = self.resolve(descriptor).await?;
        let content_type = descriptor
            .content_type
            .clone()
            .or(fetched_type)
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let mut session = BatchSession::new(self.store, self.sleeper, self.config, key.clone());
        if let Some(cancel) = self.cancel {
            session = session.with_cancellation(cancel);
        }

        let sink = self.sink;
        let mut on_progress = |percent: u8| {
            progress.current_item_percent = percent;
            sink.on_progress(progress);
        };

        match session.run(&content, &content_type, &mut on_progress).await {
            Ok(()) => {
                let upload = session.into_upload();
                info!(%item, %key, chunks = upload.chunk_ids.len(), "[SYNC] Item synced");
                Ok(UploadedAsset::from_session(&item, &content_type, &upload))
            }
            Err(e) => {
                error!(%item, %key, error = %e, state = ?session.upload().state(), "[SYNC][ERROR] Item failed, rolling back");
                session.rollback().await;
                Err(classify(item, key, e))
            }
        }
    }

    async fn resolve(
        &self,
        descriptor: &AssetDescriptor,
    ) -> Result<(Option<String>, Bytes), SyncError> {
        match &descriptor.source {
            AssetSource::Inline(bytes) => Ok((None, bytes.clone())),
            AssetSource::Url(location) => {
                info!(item = %descriptor.id, %location, "[SYNC] Fetching source content");
                match self.fetcher.fetch(location).await {
                    Ok(fetched) => Ok((fetched.content_type, fetched.bytes)),
                    Err(e) => {
                        error!(item = %descriptor.id, error = %e, "[SYNC][ERROR] Fetch failed");
                        Err(SyncError::Fetch {
                            item: descriptor.id.clone(),
                            source: e,
                        })
                    }
                }
            }
        }
    }
}

fn classify(item: String, key: String, err: SessionError) -> SyncError {
    match err {
        SessionError::Cancelled => SyncError::Cancelled { item },
        SessionError::Store(source) => match source.kind {
            StoreErrorKind::Capacity => SyncError::Capacity { item, source },
            StoreErrorKind::Conflict => SyncError::Conflict { item, key, source },
            StoreErrorKind::Transient | StoreErrorKind::Rejected => {
                SyncError::ItemFailed { item, source }
            }
        },
    }
}

/// Snapshot the store, then sync `descriptors` with tracing progress and real sleeps.
pub async fn synchronise<S, F>(
    store: &S,
    fetcher: &F,
    config: &SessionConfig,
    descriptors: &[AssetDescriptor],
) -> Result<SyncReport, SyncError>
where
    S: AssetStore + ?Sized,
    F: SourceFetcher + ?Sized,
{
    let synchroniser = Synchroniser::new(store, fetcher, config);
    let present = synchroniser.snapshot().await?;
    synchroniser.run(descriptors, &present).await
}
