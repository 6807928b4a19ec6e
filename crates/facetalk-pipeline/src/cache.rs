//! Write-through media cache over blob storage.
//!
//! Uploads are plain HTTP `PUT`s against a SAS-authorized blob URL, so no
//! storage SDK is needed. Cache failures are always recoverable: callers
//! continue with the origin URL and only forfeit CDN delivery.

use async_trait::async_trait;
use tracing::debug;

use facetalk_core::config::StorageConfig;
use facetalk_core::types::MediaLocator;
use facetalk_core::{FacetalkError, Result};
use facetalk_providers::Health;

#[async_trait]
pub trait MediaCache: Send + Sync {
    /// Store a blob under `key`, returning its delivery locator. Idempotent
    /// per key — re-caching overwrites.
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<MediaLocator>;

    /// Whether this cache can accept writes at all. When false, callers
    /// skip the write-through entirely.
    fn enabled(&self) -> bool {
        true
    }

    async fn check(&self) -> Health;
}

/// Blob cache speaking the Azure blob REST shape: `PUT` with a SAS token
/// and `x-ms-blob-type: BlockBlob`.
pub struct HttpBlobCache {
    account_endpoint: String,
    container: String,
    sas_token: String,
    cdn_endpoint: Option<String>,
    client: reqwest::Client,
}

impl HttpBlobCache {
    /// Build from config. Returns None when no SAS token resolves, so the
    /// caller can select [`NullCache`] instead.
    pub fn from_config(config: &StorageConfig) -> Option<Self> {
        let sas_token = config.resolve_sas_token()?;
        Some(Self {
            account_endpoint: config.account_endpoint.trim_end_matches('/').to_string(),
            container: config.container.clone(),
            sas_token: sas_token.trim_start_matches('?').to_string(),
            cdn_endpoint: config
                .cdn_endpoint
                .as_ref()
                .map(|c| c.trim_end_matches('/').to_string()),
            client: reqwest::Client::new(),
        })
    }

    /// Direct blob URL, without the SAS token.
    fn blob_url(&self, key: &str) -> String {
        format!("{}/{}/{key}", self.account_endpoint, self.container)
    }

    /// URL handed to clients: CDN when configured, direct blob otherwise.
    fn delivery_url(&self, key: &str) -> String {
        match &self.cdn_endpoint {
            Some(cdn) => format!("{cdn}/{}/{key}", self.container),
            None => self.blob_url(key),
        }
    }

    fn upload_url(&self, key: &str) -> String {
        format!("{}?{}", self.blob_url(key), self.sas_token)
    }
}

#[async_trait]
impl MediaCache for HttpBlobCache {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<MediaLocator> {
        let resp = self
            .client
            .put(self.upload_url(key))
            .header("x-ms-blob-type", "BlockBlob")
            .header("content-type", content_type)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| FacetalkError::CacheUnavailable(format!("blob upload failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(FacetalkError::CacheUnavailable(format!(
                "blob upload error {status}: {body}"
            )));
        }

        debug!(key, bytes = bytes.len(), "Cached media blob");
        Ok(MediaLocator {
            key: key.to_string(),
            url: self.delivery_url(key),
        })
    }

    async fn check(&self) -> Health {
        let url = format!(
            "{}/{}?restype=container&comp=list&maxresults=1&{}",
            self.account_endpoint, self.container, self.sas_token
        );
        match self
            .client
            .get(url)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => Health::Healthy,
            Ok(r) => Health::Unhealthy(format!("HTTP {}", r.status())),
            Err(e) => Health::Unhealthy(e.to_string()),
        }
    }
}

/// Cache stand-in for deployments without blob storage.
pub struct NullCache;

#[async_trait]
impl MediaCache for NullCache {
    async fn put(&self, _key: &str, _bytes: &[u8], _content_type: &str) -> Result<MediaLocator> {
        Err(FacetalkError::CacheUnavailable(
            "media cache not configured".into(),
        ))
    }

    fn enabled(&self) -> bool {
        false
    }

    async fn check(&self) -> Health {
        Health::NotConfigured
    }
}
