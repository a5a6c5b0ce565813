use super::{BlobMeta, NO_CACHE, ObjectStore, validate_key};
use crate::config::RemoteConfig;
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::{
    Method, RequestBuilder, StatusCode,
    header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, LAST_MODIFIED},
};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use url::Url;

const USER_AGENT: &str = concat!("blobsync/", env!("CARGO_PKG_VERSION"));

/// Bucket reachable over HTTP: `HEAD`, `GET` and `PUT` against `base_url/<key>`.
///
/// Works with any store that serves objects at stable URLs and reports `Last-Modified`
/// (S3-compatible endpoints behind a signing proxy, R2/GCS public buckets with write tokens,
/// plain WebDAV-ish blob servers).
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpObjectStore {
    /// Builds the client from the timeouts, proxy and token of the `remote` table.
    pub fn new(cfg: &RemoteConfig, base_url: Url) -> Result<Self, StoreError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .connect_timeout(cfg.connect_timeout())
            .timeout(cfg.request_timeout());

        if let Some(proxy_url) = cfg.proxy.as_ref() {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url.as_str())?);
        }

        Ok(Self::with_client(builder.build()?, base_url, cfg.token.clone()))
    }

    pub fn with_client(client: reqwest::Client, mut base_url: Url, token: Option<String>) -> Self {
        // `Url::join` replaces the last segment unless the base ends with a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            client,
            base_url,
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    fn object_url(&self, key: &str) -> Result<Url, StoreError> {
        validate_key(key)?;
        self.base_url
            .join(key)
            .map_err(|e| StoreError::InvalidKey(format!("{key}: {e}")))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.client.request(method, url);
        match self.token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn head(&self, key: &str) -> Result<Option<HeaderMap>, StoreError> {
        let resp = self.request(Method::HEAD, self.object_url(key)?).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(resp.headers().clone())),
            status => Err(StoreError::Status {
                key: key.to_string(),
                status,
            }),
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    fn describe(&self) -> String {
        let mut shown = self.base_url.clone();
        // Never leak credentials embedded in the URL.
        let _ = shown.set_password(None);
        shown.set_query(None);
        shown.to_string()
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.head(key).await?.is_some())
    }

    async fn download(&self, key: &str, dest: &Path) -> Result<(), StoreError> {
        let resp = self.request(Method::GET, self.object_url(key)?).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => return Err(StoreError::NotFound(key.to_string())),
            status if !status.is_success() => {
                return Err(StoreError::Status {
                    key: key.to_string(),
                    status,
                });
            }
            _ => {}
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn upload(&self, key: &str, src: &Path, content_type: &str) -> Result<(), StoreError> {
        let body = tokio::fs::read(src).await?;
        let resp = self
            .request(Method::PUT, self.object_url(key)?)
            .header(CONTENT_TYPE, content_type)
            .header(CACHE_CONTROL, NO_CACHE)
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(StoreError::Status {
                key: key.to_string(),
                status,
            })
        }
    }

    async fn metadata(&self, key: &str) -> Result<BlobMeta, StoreError> {
        let headers = self
            .head(key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        blob_meta(key, &headers)
    }
}

fn blob_meta(key: &str, headers: &HeaderMap) -> Result<BlobMeta, StoreError> {
    let header = |name, label: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| StoreError::InvalidMetadata(format!("{key}: missing {label}")))
    };

    let raw = header(LAST_MODIFIED, "Last-Modified")?;
    let last_modified = parse_http_date(raw)
        .ok_or_else(|| StoreError::InvalidMetadata(format!("{key}: bad Last-Modified {raw:?}")))?;

    let raw = header(CONTENT_LENGTH, "Content-Length")?;
    let size = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| StoreError::InvalidMetadata(format!("{key}: bad Content-Length {raw:?}")))?;

    Ok(BlobMeta {
        last_modified,
        size,
    })
}

/// Parses an HTTP-date (`Sun, 06 Nov 1994 08:49:37 GMT`) into UTC.
pub fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
