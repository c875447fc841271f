//! Batch session: the five-call write protocol for a single asset.
//!
//! ```text
//! Idle -> AssetCreated -> BatchOpen -> ChunksUploading -> ChunksComplete -> Committing -> Committed
//!   \__________________________________________________________________________/
//!                                      |
//!                                RollingBack -> Failed
//! ```
//!
//! Every protocol call goes through the session's [`RetryPolicy`](crate::retry::RetryPolicy) on its own, so a
//! failed chunk group only retries that group. [`BatchSession::run`] leaves a failed
//! session where it stopped; the caller decides when to [`BatchSession::rollback`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::chunker;
use crate::config::SessionConfig;
use crate::contract::{AssetStore, BatchId, ChunkId, CreateAssetRequest, SetAssetContent, Sleeper};
use crate::error::{SessionError, StoreError, StoreErrorKind};
use crate::hasher;
use crate::progress::milestone;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Idle,
    AssetCreated,
    BatchOpen,
    ChunksUploading,
    ChunksComplete,
    Committing,
    Committed,
    RollingBack,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Committed | SessionState::Failed)
    }
}

/// Shared stop signal, checked before every store call and rate-limit pause.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a session knows about its upload. Handles are only ever appended in
/// byte-offset order.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub asset_key: String,
    pub batch_id: Option<BatchId>,
    pub chunk_ids: Vec<ChunkId>,
    pub digest: Option<[u8; 32]>,
    pub chunk_groups: usize,
    pub byte_len: usize,
    state: SessionState,
    /// Set once `create_asset` was sent and did not report a conflict. The
    /// store may have registered the key even when the call failed.
    owns_asset: bool,
}

impl UploadSession {
    fn new(asset_key: String) -> Self {
        Self {
            asset_key,
            batch_id: None,
            chunk_ids: Vec::new(),
            digest: None,
            chunk_groups: 0,
            byte_len: 0,
            state: SessionState::Idle,
            owns_asset: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }
}

pub struct BatchSession<'a, S: ?Sized, Z: ?Sized> {
    store: &'a S,
    sleeper: &'a Z,
    config: &'a SessionConfig,
    cancel: Option<&'a CancellationFlag>,
    upload: UploadSession,
}

impl<'a, S, Z> BatchSession<'a, S, Z>
where
    S: AssetStore + ?Sized,
    Z: Sleeper + ?Sized,
{
    pub fn new(
        store: &'a S,
        sleeper: &'a Z,
        config: &'a SessionConfig,
        asset_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            sleeper,
            config,
            cancel: None,
            upload: UploadSession::new(asset_key.into()),
        }
    }

    pub fn with_cancellation(mut self, cancel: &'a CancellationFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn upload(&self) -> &UploadSession {
        &self.upload
    }

    pub fn into_upload(self) -> UploadSession {
        self.upload
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            next > self.upload.state,
            "session state must move forward: {:?} -> {:?}",
            self.upload.state,
            next
        );
        debug!(key = %self.upload.asset_key, from = ?self.upload.state, to = ?next, "[SYNC][SESSION] State change");
        self.upload.state = next;
    }

    fn ensure_not_cancelled(&self) -> Result<(), SessionError> {
        match self.cancel {
            Some(flag) if flag.is_cancelled() => Err(SessionError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Upload `content` and commit it under the session's key.
    ///
    /// `on_progress` receives the item percent at each milestone up to the
    /// pre-commit mark; the caller reports completion.
    pub async fn run(
        &mut self,
        content: &Bytes,
        content_type: &str,
        on_progress: &mut (dyn FnMut(u8) + Send),
    ) -> Result<(), SessionError> {
        let store = self.store;
        let sleeper = self.sleeper;
        let retry = self.config.retry;
        let key = self.upload.asset_key.clone();

        // 1. Register the asset.
        self.ensure_not_cancelled()?;
        let options = &self.config.asset;
        let req = CreateAssetRequest {
            key: key.clone(),
            content_type: content_type.to_string(),
            headers: options
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            allow_raw_access: options.allow_raw_access,
            max_age: options.max_age,
            enable_aliasing: options.enable_aliasing,
        };
        info!(%key, content_type, bytes = content.len(), "[SYNC][UPLOAD] Creating asset");
        let created = retry
            .run("create_asset", sleeper, || store.create_asset(req.clone()))
            .await;
        // A conflicting key belongs to someone else.
        self.upload.owns_asset =
            !matches!(&created, Err(e) if e.kind == StoreErrorKind::Conflict);
        created?;
        self.transition(SessionState::AssetCreated);
        on_progress(milestone::ASSET_CREATED);

        // 2. Open the batch.
        self.ensure_not_cancelled()?;
        let batch_id = retry
            .run("create_batch", sleeper, || store.create_batch())
            .await?;
        info!(%key, batch_id = batch_id.0, "[SYNC][UPLOAD] Batch opened");
        self.upload.batch_id = Some(batch_id);
        self.transition(SessionState::BatchOpen);
        on_progress(milestone::BATCH_OPEN);

        // 3. Upload chunk groups in offset order. The digest covers the very
        //    buffer being chunked.
        let chunks = chunker::chunk(content, self.config.chunk_size);
        let groups = chunker::group(&chunks, self.config.max_chunks_per_batch);
        let digest = hasher::digest(content);
        self.upload.digest = Some(digest);
        self.upload.byte_len = content.len();
        self.upload.chunk_groups = groups.len();
        self.transition(SessionState::ChunksUploading);
        on_progress(milestone::CHUNKS_START);

        let total = groups.len();
        for (index, group) in groups.into_iter().enumerate() {
            if index > 0 {
                self.ensure_not_cancelled()?;
                sleeper.sleep(self.config.rate_limit_delay).await;
            }
            self.ensure_not_cancelled()?;
            let expected = group.len();
            let ids = retry
                .run("create_chunks", sleeper, || {
                    store.create_chunks(batch_id, group.clone())
                })
                .await?;
            if ids.len() != expected {
                return Err(StoreError::rejected(format!(
                    "create_chunks returned {} handles for {} chunks",
                    ids.len(),
                    expected
                ))
                .into());
            }
            self.upload.chunk_ids.extend(ids);
            debug!(%key, group = index + 1, groups = total, chunks = self.upload.chunk_ids.len(), "[SYNC][UPLOAD] Chunk group uploaded");
            on_progress(milestone::chunk_groups(index + 1, total));
        }
        self.transition(SessionState::ChunksComplete);

        // 4. Commit.
        if total == 0 {
            on_progress(milestone::PRE_COMMIT);
        }
        self.ensure_not_cancelled()?;
        self.transition(SessionState::Committing);
        let op = SetAssetContent {
            key: key.clone(),
            sha256: digest,
            chunk_ids: self.upload.chunk_ids.clone(),
            content_encoding: self.config.asset.content_encoding.clone(),
        };
        retry
            .run("commit_batch", sleeper, || store.commit_batch(batch_id, op.clone()))
            .await?;
        self.transition(SessionState::Committed);
        info!(
            %key,
            chunks = self.upload.chunk_ids.len(),
            digest = %hasher::digest_hex(&digest),
            "[SYNC][UPLOAD] Batch committed"
        );
        Ok(())
    }

    /// Best-effort cleanup of whatever this session created.
    ///
    /// Both calls are attempted even if the first fails. Failures are logged and
    /// swallowed so the error that triggered the rollback is the one reported.
    pub async fn rollback(&mut self) {
        if self.upload.state.is_terminal() {
            return;
        }
        self.transition(SessionState::RollingBack);
        let key = self.upload.asset_key.clone();

        if let Some(batch_id) = self.upload.batch_id {
            match self.store.delete_batch(batch_id).await {
                Ok(()) => info!(%key, batch_id = batch_id.0, "[SYNC][ROLLBACK] Batch deleted"),
                Err(e) => {
                    warn!(%key, batch_id = batch_id.0, error = %e, "[SYNC][ROLLBACK] delete_batch failed")
                }
            }
        }

        if self.upload.owns_asset {
            match self.store.delete_asset(key.clone()).await {
                Ok(()) => info!(%key, "[SYNC][ROLLBACK] Asset deleted"),
                Err(e) => warn!(%key, error = %e, "[SYNC][ROLLBACK] delete_asset failed"),
            }
        }

        self.transition(SessionState::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncSettings;
    use crate::contract::MockAssetStore;
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoSleep;

    #[async_trait]
    impl Sleeper for NoSleep {
        async fn sleep(&self, _duration: Duration) {}
    }

    fn small_chunks() -> SessionConfig {
        SyncSettings {
            chunk_size: 4,
            max_chunks_per_batch: 2,
            ..SyncSettings::default()
        }
        .validate()
        .unwrap()
    }

    #[tokio::test]
    async fn successful_run_ends_committed_with_ordered_handles() {
        let mut store = MockAssetStore::new();
        store.expect_create_asset().times(1).returning(|_| Ok(()));
        store.expect_create_batch().times(1).returning(|| Ok(BatchId(7)));
        let mut next = 0u64;
        store.expect_create_chunks().times(2).returning(move |_, group| {
            let ids = (next..next + group.len() as u64).map(ChunkId).collect();
            next += group.len() as u64;
            Ok(ids)
        });
        store
            .expect_commit_batch()
            .withf(|batch, op| *batch == BatchId(7) && op.chunk_ids.len() == 3)
            .times(1)
            .returning(|_, _| Ok(()));

        let config = small_chunks();
        let content = Bytes::from_static(b"0123456789");
        let mut session = BatchSession::new(&store, &NoSleep, &config, "/a.bin");
        let mut percents = Vec::new();
        session
            .run(&content, "application/octet-stream", &mut |p: u8| percents.push(p))
            .await
            .unwrap();

        let upload = session.into_upload();
        assert_eq!(upload.state(), SessionState::Committed);
        assert_eq!(upload.chunk_ids, vec![ChunkId(0), ChunkId(1), ChunkId(2)]);
        assert_eq!(upload.chunk_groups, 2);
        assert_eq!(upload.digest, Some(hasher::digest(&content)));
        assert_eq!(percents, vec![10, 15, 20, 55, 90]);
    }

    #[tokio::test]
    async fn rollback_before_batch_only_deletes_asset() {
        let mut store = MockAssetStore::new();
        store.expect_create_asset().returning(|_| Ok(()));
        store
            .expect_create_batch()
            .times(1)
            .returning(|| Err(StoreError::rejected("no batches today")));
        store.expect_delete_batch().times(0);
        store
            .expect_delete_asset()
            .withf(|key| key == "/a.bin")
            .times(1)
            .returning(|_| Ok(()));

        let config = small_chunks();
        let mut session = BatchSession::new(&store, &NoSleep, &config, "/a.bin");
        let err = session
            .run(&Bytes::from_static(b"abc"), "text/plain", &mut |_: u8| {})
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Store(ref e) if e.kind == StoreErrorKind::Rejected));
        assert_eq!(session.upload().state(), SessionState::AssetCreated);

        session.rollback().await;
        assert_eq!(session.upload().state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn short_handle_list_is_rejected() {
        let mut store = MockAssetStore::new();
        store.expect_create_asset().returning(|_| Ok(()));
        store.expect_create_batch().returning(|| Ok(BatchId(1)));
        store
            .expect_create_chunks()
            .returning(|_, _| Ok(vec![ChunkId(0)]));
        store.expect_commit_batch().times(0);

        let config = small_chunks();
        let mut session = BatchSession::new(&store, &NoSleep, &config, "/a.bin");
        let err = session
            .run(&Bytes::from_static(b"01234567"), "text/plain", &mut |_: u8| {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1 handles for 2 chunks"), "got: {err}");
        assert_eq!(session.upload().state(), SessionState::ChunksUploading);
    }

    #[tokio::test]
    async fn cancelled_session_makes_no_calls() {
        let store = MockAssetStore::new();
        let config = small_chunks();
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let mut session =
            BatchSession::new(&store, &NoSleep, &config, "/a.bin").with_cancellation(&cancel);
        let err = session
            .run(&Bytes::from_static(b"abc"), "text/plain", &mut |_: u8| {})
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Cancelled));

        // Nothing owned, nothing deleted.
        session.rollback().await;
        assert_eq!(session.upload().state(), SessionState::Failed);
    }
}
