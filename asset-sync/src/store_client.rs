#![doc = "Asset store integration for the CLI: implements the core `AssetStore` contract over HTTP."]
//
//! # Asset store client (CLI <-> Core)
//!
//! [`HttpAssetStore`] speaks the batch write protocol as JSON over HTTP:
//! every protocol call is `POST {base_url}/{method}` with a JSON body.
//! Chunk content and digests travel hex-encoded; handles are plain numbers.
//!
//! - Construct with [`HttpAssetStore::new_from_env`] (`ASSET_STORE_TOKEN`).
//! - Failed calls are classified into [`StoreErrorKind`]s by [`classify_failure`],
//!   which is what the retry layer and the orchestrator act on.

use std::env;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use asset_sync_core::contract::{
    AssetEntry, AssetStore, BatchId, ChunkId, CreateAssetRequest, SetAssetContent,
};
use asset_sync_core::error::{StoreError, StoreErrorKind};

pub const TOKEN_ENV: &str = "ASSET_STORE_TOKEN";

pub struct HttpAssetStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Serialize)]
struct BatchRef {
    batch_id: BatchId,
}

#[derive(Serialize)]
struct KeyRef<'a> {
    key: &'a str,
}

#[derive(Serialize)]
struct Empty {}

#[derive(Deserialize)]
struct CreateBatchResponse {
    batch_id: BatchId,
}

#[derive(Serialize)]
struct CreateChunksRequest {
    batch_id: BatchId,
    content: Vec<String>,
}

#[derive(Deserialize)]
struct CreateChunksResponse {
    chunk_ids: Vec<ChunkId>,
}

#[derive(Serialize)]
struct CommitBatchRequest {
    batch_id: BatchId,
    operations: Vec<BatchOperation>,
}

#[derive(Serialize)]
enum BatchOperation {
    SetAssetContent(SetAssetContentWire),
}

#[derive(Serialize)]
struct SetAssetContentWire {
    key: String,
    sha256: String,
    chunk_ids: Vec<ChunkId>,
    content_encoding: String,
}

impl From<SetAssetContent> for SetAssetContentWire {
    fn from(op: SetAssetContent) -> Self {
        Self {
            key: op.key,
            sha256: hex::encode(op.sha256),
            chunk_ids: op.chunk_ids,
            content_encoding: op.content_encoding,
        }
    }
}

fn capacity_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)out of (cycles|memory)|insufficient (cycles|memory|storage)|capacity (exceeded|exhausted)|quota exceeded|heap (is )?full")
            .expect("capacity pattern is a valid regex")
    })
}

fn conflict_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)already exists").expect("conflict pattern is a valid regex")
    })
}

/// Map an HTTP status and response body onto the store error taxonomy.
pub fn classify_failure(status: u16, body: &str) -> StoreErrorKind {
    if status == 409 || conflict_pattern().is_match(body) {
        StoreErrorKind::Conflict
    } else if status == 507 || capacity_pattern().is_match(body) {
        StoreErrorKind::Capacity
    } else if status == 408 || status == 429 || status >= 500 {
        StoreErrorKind::Transient
    } else {
        StoreErrorKind::Rejected
    }
}

impl HttpAssetStore {
    pub fn new(base_url: &str, token: String) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn new_from_env(base_url: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        dotenvy::dotenv().ok(); // loads environment variables from .env if present
        match env::var(TOKEN_ENV) {
            Ok(token) => {
                tracing::info!(
                    base_url,
                    token_set = !token.is_empty(),
                    "Initialized HttpAssetStore from environment"
                );
                Self::new(base_url, token)
            }
            Err(e) => {
                tracing::error!(error = ?e, "{TOKEN_ENV} missing in environment");
                Err(format!("{TOKEN_ENV} missing in environment: {e}").into())
            }
        }
    }

    async fn post(&self, method: &str, body: &impl Serialize) -> Result<reqwest::Response, StoreError> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = ?e, method, "Transport error calling asset store");
                StoreError::transient(format!("{method}: {e}"))
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let kind = classify_failure(status.as_u16(), &text);
        tracing::error!(method, status = status.as_u16(), ?kind, body = %text, "Asset store call failed");
        Err(StoreError::new(kind, format!("{method} returned {status}: {text}")))
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, body: &impl Serialize) -> Result<R, StoreError> {
        let response = self.post(method, body).await?;
        response
            .json::<R>()
            .await
            .map_err(|e| StoreError::rejected(format!("{method}: malformed response: {e}")))
    }
}

#[async_trait]
impl AssetStore for HttpAssetStore {
    async fn create_asset(&self, req: CreateAssetRequest) -> Result<(), StoreError> {
        tracing::info!(key = %req.key, content_type = %req.content_type, "Creating asset");
        self.post("create_asset", &req).await.map(|_| ())
    }

    async fn create_batch(&self) -> Result<BatchId, StoreError> {
        let resp: CreateBatchResponse = self.call("create_batch", &Empty {}).await?;
        tracing::info!(batch_id = resp.batch_id.0, "Created batch");
        Ok(resp.batch_id)
    }

    async fn create_chunks(
        &self,
        batch_id: BatchId,
        content: Vec<Bytes>,
    ) -> Result<Vec<ChunkId>, StoreError> {
        let bytes: usize = content.iter().map(Bytes::len).sum();
        tracing::debug!(batch_id = batch_id.0, chunks = content.len(), bytes, "Uploading chunk group");
        let body = CreateChunksRequest {
            batch_id,
            content: content.iter().map(hex::encode).collect(),
        };
        let resp: CreateChunksResponse = self.call("create_chunks", &body).await?;
        Ok(resp.chunk_ids)
    }

    async fn commit_batch(&self, batch_id: BatchId, op: SetAssetContent) -> Result<(), StoreError> {
        tracing::info!(batch_id = batch_id.0, key = %op.key, chunks = op.chunk_ids.len(), "Committing batch");
        let body = CommitBatchRequest {
            batch_id,
            operations: vec![BatchOperation::SetAssetContent(op.into())],
        };
        self.post("commit_batch", &body).await.map(|_| ())
    }

    async fn delete_batch(&self, batch_id: BatchId) -> Result<(), StoreError> {
        tracing::info!(batch_id = batch_id.0, "Deleting batch");
        self.post("delete_batch", &BatchRef { batch_id }).await.map(|_| ())
    }

    async fn delete_asset(&self, key: String) -> Result<(), StoreError> {
        tracing::info!(%key, "Deleting asset");
        self.post("delete_asset", &KeyRef { key: &key }).await.map(|_| ())
    }

    async fn list(&self) -> Result<Vec<AssetEntry>, StoreError> {
        let entries: Vec<AssetEntry> = self.call("list", &Empty {}).await?;
        tracing::info!(count = entries.len(), "Listed assets");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_win_over_everything() {
        assert_eq!(classify_failure(409, ""), StoreErrorKind::Conflict);
        assert_eq!(
            classify_failure(400, "asset /a already exists"),
            StoreErrorKind::Conflict
        );
    }

    #[test]
    fn capacity_signals_are_recognised() {
        assert_eq!(classify_failure(507, ""), StoreErrorKind::Capacity);
        assert_eq!(
            classify_failure(500, "Canister is out of cycles"),
            StoreErrorKind::Capacity
        );
        assert_eq!(
            classify_failure(503, "Insufficient memory to grow stable storage"),
            StoreErrorKind::Capacity
        );
    }

    #[test]
    fn throttling_and_server_errors_are_transient() {
        for status in [408, 429, 500, 502, 503] {
            assert_eq!(classify_failure(status, "try again"), StoreErrorKind::Transient);
        }
    }

    #[test]
    fn other_client_errors_are_rejected() {
        assert_eq!(classify_failure(400, "bad digest"), StoreErrorKind::Rejected);
        assert_eq!(classify_failure(403, "forbidden"), StoreErrorKind::Rejected);
        assert_eq!(
            classify_failure(400, "invalid capacity header"),
            StoreErrorKind::Rejected
        );
    }

    #[test]
    fn capacity_needs_exhaustion_wording() {
        assert_eq!(
            classify_failure(400, "storage capacity exceeded"),
            StoreErrorKind::Capacity
        );
    }

    #[test]
    fn commit_body_uses_hex_digest_and_tagged_operation() {
        let body = CommitBatchRequest {
            batch_id: BatchId(3),
            operations: vec![BatchOperation::SetAssetContent(
                SetAssetContent {
                    key: "/a.png".into(),
                    sha256: [0xab; 32],
                    chunk_ids: vec![ChunkId(1), ChunkId(2)],
                    content_encoding: "identity".into(),
                }
                .into(),
            )],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["batch_id"], 3);
        let op = &json["operations"][0]["SetAssetContent"];
        assert_eq!(op["key"], "/a.png");
        assert_eq!(op["sha256"], "ab".repeat(32));
        assert_eq!(op["chunk_ids"], serde_json::json!([1, 2]));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let store = HttpAssetStore::new("https://assets.example/api/", "t".into()).unwrap();
        assert_eq!(store.base_url, "https://assets.example/api");
    }
}
