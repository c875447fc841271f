use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chunker::{DEFAULT_CHUNK_SIZE, MAX_CHUNKS_PER_BATCH};
use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// Largest chunk a single store call accepts.
pub const MAX_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Upper bound on attempts per store call.
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Public IPFS gateway used when none is configured.
pub const DEFAULT_IPFS_GATEWAY: &str = "https://ipfs.io";

/// Tunables of a sync run as they appear in configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub chunk_size: usize,
    pub max_chunks_per_batch: usize,
    /// Pause between consecutive chunk-group uploads.
    pub rate_limit_delay_ms: u64,
    pub retry: RetrySettings,
    pub asset: AssetOptions,
    pub fetch: FetchSettings,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunks_per_batch: MAX_CHUNKS_PER_BATCH,
            rate_limit_delay_ms: 500,
            retry: RetrySettings::default(),
            asset: AssetOptions::default(),
            fetch: FetchSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            backoff_factor: policy.backoff_factor,
        }
    }
}

/// Metadata and cache policy applied to every created asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetOptions {
    pub headers: BTreeMap<String, String>,
    pub allow_raw_access: bool,
    /// `Cache-Control: max-age` in seconds.
    pub max_age: Option<u64>,
    pub enable_aliasing: bool,
    pub content_encoding: String,
}

impl Default for AssetOptions {
    fn default() -> Self {
        Self {
            headers: BTreeMap::new(),
            allow_raw_access: false,
            max_age: Some(31_536_000),
            enable_aliasing: false,
            content_encoding: "identity".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub ipfs_gateway: String,
    pub timeout_secs: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            ipfs_gateway: DEFAULT_IPFS_GATEWAY.to_string(),
            timeout_secs: 60,
        }
    }
}

/// Validated settings handed to batch sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub chunk_size: NonZeroUsize,
    pub max_chunks_per_batch: NonZeroUsize,
    pub rate_limit_delay: Duration,
    pub retry: RetryPolicy,
    pub asset: AssetOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        // Defaults are valid by construction.
        SyncSettings::default()
            .validate()
            .unwrap_or_else(|e| unreachable!("default sync settings are invalid: {e}"))
    }
}

impl SyncSettings {
    pub fn validate(&self) -> Result<SessionConfig, ConfigError> {
        let chunk_size = NonZeroUsize::new(self.chunk_size)
            .filter(|size| size.get() <= MAX_CHUNK_SIZE)
            .ok_or(ConfigError::ChunkSize {
                got: self.chunk_size,
                max: MAX_CHUNK_SIZE,
            })?;
        let max_chunks_per_batch =
            NonZeroUsize::new(self.max_chunks_per_batch).ok_or(ConfigError::MaxChunksPerBatch)?;
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::MaxAttempts);
        }
        if self.retry.max_attempts > MAX_RETRY_ATTEMPTS {
            return Err(ConfigError::TooManyAttempts {
                got: self.retry.max_attempts,
                max: MAX_RETRY_ATTEMPTS,
            });
        }
        let factor = self.retry.backoff_factor;
        if !factor.is_finite() || factor < 1.0 {
            return Err(ConfigError::BackoffFactor(factor));
        }

        Ok(SessionConfig {
            chunk_size,
            max_chunks_per_batch,
            rate_limit_delay: Duration::from_millis(self.rate_limit_delay_ms),
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                base_delay: Duration::from_millis(self.retry.base_delay_ms),
                backoff_factor: factor,
            },
            asset: self.asset.clone(),
        })
    }

    pub fn trace_loaded(&self) {
        info!(
            chunk_size = self.chunk_size,
            max_chunks_per_batch = self.max_chunks_per_batch,
            rate_limit_delay_ms = self.rate_limit_delay_ms,
            max_attempts = self.retry.max_attempts,
            ipfs_gateway = %self.fetch.ipfs_gateway,
            "Loaded SyncSettings"
        );
        debug!(?self, "SyncSettings loaded (full debug)");
    }
}
