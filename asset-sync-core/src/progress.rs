//! Progress of a sync run and the sinks that observe it.

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::contract::ProgressSink;

/// Snapshot of a run. Only the orchestrator mutates it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub current_item: Option<String>,
    /// Always within `0..=100`.
    pub current_item_percent: u8,
    pub total_completed: usize,
    pub total_items: usize,
}

/// Percent milestones of a single item.
pub mod milestone {
    pub const SELECTED: u8 = 5;
    pub const ASSET_CREATED: u8 = 10;
    pub const BATCH_OPEN: u8 = 15;
    pub const CHUNKS_START: u8 = 20;
    pub const PRE_COMMIT: u8 = 90;
    pub const COMMITTED: u8 = 100;

    /// Percent after `done` of `total` chunk groups have been uploaded.
    pub fn chunk_groups(done: usize, total: usize) -> u8 {
        if total == 0 {
            return PRE_COMMIT;
        }
        let span = (PRE_COMMIT - CHUNKS_START) as usize;
        CHUNKS_START + (span * done.min(total) / total) as u8
    }
}

/// Logs every progress change as a structured tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_progress(&self, progress: &Progress) {
        info!(
            item = progress.current_item.as_deref().unwrap_or("-"),
            percent = progress.current_item_percent,
            completed = progress.total_completed,
            total = progress.total_items,
            "[SYNC][PROGRESS]"
        );
    }
}

/// Publishes the latest snapshot on a watch channel. Never blocks; slow
/// readers only ever see the most recent value.
#[derive(Debug)]
pub struct WatchProgressSink {
    tx: watch::Sender<Progress>,
}

impl WatchProgressSink {
    pub fn channel() -> (Self, watch::Receiver<Progress>) {
        let (tx, rx) = watch::channel(Progress::default());
        (Self { tx }, rx)
    }
}

impl ProgressSink for WatchProgressSink {
    fn on_progress(&self, progress: &Progress) {
        self.tx.send_replace(progress.clone());
    }
}
