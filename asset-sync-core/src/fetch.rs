//! Source content resolution.
//!
//! [`HttpFetcher`] downloads `http(s)` locations directly and rewrites
//! content-addressed `ipfs://<cid>/<path>` locations onto an HTTP gateway.
//! [`DedupFetcher`] wraps any fetcher so concurrent requests for the same
//! location share one download.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, error, info};
use url::Url;

use crate::config::FetchSettings;
use crate::contract::{Fetched, SourceFetcher};
use crate::error::FetchError;
use crate::single_flight::SingleFlight;

pub struct HttpFetcher {
    client: reqwest::Client,
    gateway: Url,
}

impl HttpFetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self, FetchError> {
        let gateway = Url::parse(&settings.ipfs_gateway).map_err(|e| FetchError::InvalidLocation {
            location: settings.ipfs_gateway.clone(),
            reason: format!("invalid gateway: {e}"),
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| FetchError::Request {
                url: gateway.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        info!(gateway = %gateway, timeout_secs = settings.timeout_secs, "Initialized HttpFetcher");
        Ok(Self { client, gateway })
    }

    /// Map a source location to the URL actually requested.
    pub fn resolve(&self, location: &str) -> Result<Url, FetchError> {
        let invalid = |reason: String| FetchError::InvalidLocation {
            location: location.to_string(),
            reason,
        };
        let url = Url::parse(location).map_err(|e| invalid(e.to_string()))?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            "ipfs" => {
                let cid = url
                    .host_str()
                    .filter(|cid| !cid.is_empty())
                    .ok_or_else(|| invalid("missing content identifier".to_string()))?;
                let mut resolved = format!(
                    "{}/ipfs/{}{}",
                    self.gateway.as_str().trim_end_matches('/'),
                    cid,
                    url.path()
                );
                if let Some(query) = url.query() {
                    resolved.push('?');
                    resolved.push_str(query);
                }
                Url::parse(&resolved).map_err(|e| invalid(e.to_string()))
            }
            other => Err(invalid(format!("unsupported scheme {other:?}"))),
        }
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, location: &str) -> Result<Fetched, FetchError> {
        let url = self.resolve(location)?;
        debug!(location, url = %url, "[FETCH] Requesting source content");

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            error!(error = ?e, url = %url, "[FETCH] Request failed");
            FetchError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            error!(url = %url, status = status.as_u16(), "[FETCH] Unexpected status");
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(|e| FetchError::Request {
            url: url.to_string(),
            reason: format!("failed to read body: {e}"),
        })?;

        info!(url = %url, bytes = bytes.len(), content_type = ?content_type, "[FETCH] Source content fetched");
        Ok(Fetched {
            content_type,
            bytes,
        })
    }
}

/// Shares one in-flight fetch between concurrent callers asking for the same location.
pub struct DedupFetcher<F> {
    inner: Arc<F>,
    flights: SingleFlight<String, Fetched, FetchError>,
}

impl<F> DedupFetcher<F>
where
    F: SourceFetcher + 'static,
{
    pub fn new(inner: F) -> Self {
        Self {
            inner: Arc::new(inner),
            flights: SingleFlight::new(),
        }
    }
}

#[async_trait]
impl<F> SourceFetcher for DedupFetcher<F>
where
    F: SourceFetcher + 'static,
{
    async fn fetch(&self, location: &str) -> Result<Fetched, FetchError> {
        let inner = Arc::clone(&self.inner);
        let owned = location.to_string();
        self.flights
            .run(location.to_string(), move || async move {
                inner.fetch(&owned).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockSourceFetcher;
    use bytes::Bytes;

    fn fetcher(gateway: &str) -> HttpFetcher {
        HttpFetcher::new(&FetchSettings {
            ipfs_gateway: gateway.to_string(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn ipfs_locations_go_through_the_gateway() {
        let f = fetcher("https://gateway.example/");
        let url = f
            .resolve("ipfs://QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG/images/1.png")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://gateway.example/ipfs/QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG/images/1.png"
        );
    }

    #[test]
    fn http_locations_are_used_as_is() {
        let f = fetcher("https://ipfs.io");
        let url = f.resolve("https://cdn.example/a.png?w=1").unwrap();
        assert_eq!(url.as_str(), "https://cdn.example/a.png?w=1");
    }

    #[test]
    fn unsupported_or_malformed_locations_are_rejected() {
        let f = fetcher("https://ipfs.io");
        assert!(matches!(
            f.resolve("ftp://host/file"),
            Err(FetchError::InvalidLocation { .. })
        ));
        assert!(matches!(
            f.resolve("not a url"),
            Err(FetchError::InvalidLocation { .. })
        ));
    }

    #[tokio::test]
    async fn dedup_fetcher_delegates_to_inner() {
        let mut inner = MockSourceFetcher::new();
        inner
            .expect_fetch()
            .times(1)
            .returning(|_| {
                Ok(Fetched {
                    content_type: Some("image/png".into()),
                    bytes: Bytes::from_static(b"png"),
                })
            });

        let fetched = DedupFetcher::new(inner).fetch("ipfs://cid/x").await.unwrap();
        assert_eq!(fetched.bytes, Bytes::from_static(b"png"));
        assert_eq!(fetched.content_type.as_deref(), Some("image/png"));
    }
}
