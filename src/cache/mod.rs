//! Durable URL-keyed HTTP cache
//!
//! Each backend keeps a cache directory holding one JSON file per upstream
//! URL (file name = URL-safe base64 of the URL) with the last observed ETag,
//! `Last-Modified`, and body. Writes are write-through and last-writer-wins;
//! entries are idempotent so a racing writer is harmless. Corrupt entries
//! are discarded on read rather than surfacing as errors.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{RegistryError, RegistryResult};

/// One cached upstream response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntry {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(rename = "lastModified", skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(rename = "fetchedAt")]
    pub fetched_at: DateTime<Utc>,
    pub body: String,
}

/// Flat-file ETag/body cache for one backend.
#[derive(Debug, Clone)]
pub struct HttpCache {
    dir: PathBuf,
}

impl HttpCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> RegistryResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| RegistryError::internal(format!("cannot create cache dir: {e}")))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", URL_SAFE_NO_PAD.encode(url.as_bytes())))
    }

    /// Look up the cached entry for a URL, discarding corrupt files.
    pub fn get(&self, url: &str) -> Option<CachedEntry> {
        let path = self.entry_path(url);
        let raw = std::fs::read(&path).ok()?;
        match serde_json::from_slice::<CachedEntry>(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(url, error = %e, "discarding corrupt cache entry");
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }

    /// Store an entry. The write is atomic (temp file + rename) so readers
    /// never observe a torn file.
    pub fn put(&self, entry: &CachedEntry) -> RegistryResult<()> {
        let path = self.entry_path(&entry.url);
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_vec(entry)
            .map_err(|e| RegistryError::internal(format!("cannot serialize cache entry: {e}")))?;
        std::fs::write(&tmp, raw)
            .map_err(|e| RegistryError::internal(format!("cannot write cache entry: {e}")))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| RegistryError::internal(format!("cannot publish cache entry: {e}")))?;
        debug!(url = %entry.url, "cache entry stored");
        Ok(())
    }

    /// The ETag to present as `If-None-Match` on the next fetch of `url`.
    pub fn validator(&self, url: &str) -> Option<String> {
        self.get(url).and_then(|e| e.etag)
    }

    /// ETag-aware fetch: presents the stored validator, serves the cached
    /// body on `304 Not Modified`, and writes through on `200`.
    ///
    /// Upstream adapters build their incremental-refresh paths on this.
    pub async fn conditional_fetch(
        &self,
        client: &reqwest::Client,
        url: &str,
    ) -> RegistryResult<CachedEntry> {
        let mut request = client.get(url);
        let validator = self.validator(url);
        if let Some(validator) = &validator {
            request = request.header(reqwest::header::IF_NONE_MATCH, validator);
        }

        let mut response = request
            .send()
            .await
            .map_err(|e| RegistryError::from_transport(url, &e))?;

        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            if let Some(entry) = self.get(url) {
                debug!(url, "serving cached body after 304");
                return Ok(entry);
            }
            // Validator matched but the body file is gone: one plain fetch.
            response = client
                .get(url)
                .send()
                .await
                .map_err(|e| RegistryError::from_transport(url, &e))?;
        }

        if !response.status().is_success() {
            return Err(RegistryError::from_upstream_status(
                url,
                response.status().as_u16(),
            ));
        }

        let etag = header_value(&response, reqwest::header::ETAG);
        let last_modified = header_value(&response, reqwest::header::LAST_MODIFIED);
        let body = response
            .text()
            .await
            .map_err(|e| RegistryError::from_transport(url, &e))?;

        let entry = CachedEntry {
            url: url.to_string(),
            etag,
            last_modified,
            fetched_at: Utc::now(),
            body,
        };
        self.put(&entry)?;
        Ok(entry)
    }
}

fn header_value(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}
