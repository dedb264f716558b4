// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Local on-disk cache of fetched payloads.

use super::{FetchRequest, Payload, Transport};
use crate::config::default_cache_dir;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Wraps another transport and keeps a copy of every remote payload.
///
/// Entries are named by the SHA-256 of their URL. `file:` URLs are passed
/// through uncached.
#[derive(Clone)]
pub struct CachingTransport {
    inner: Arc<dyn Transport>,
    cache_dir: PathBuf,
}

impl CachingTransport {
    /// Create a cache in `cache_dir`, or the default cache directory.
    pub fn new(inner: Arc<dyn Transport>, cache_dir: Option<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.unwrap_or_else(default_cache_dir);
        std::fs::create_dir_all(cache_dir.join("sources"))?;
        Ok(Self { inner, cache_dir })
    }

    /// Get the cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path of the cache entry for `url`.
    pub fn entry_path(&self, url: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(url.as_bytes()));
        self.cache_dir.join("sources").join(digest)
    }

    fn is_cacheable(url: &str) -> bool {
        !url.starts_with("file:")
    }

    /// Remove every cached entry.
    pub async fn clear(&self) -> Result<()> {
        let dir = self.cache_dir.join("sources");
        if dir.exists() {
            fs::remove_dir_all(&dir).await?;
        }
        fs::create_dir_all(&dir).await?;
        info!("Cleared module cache at {}", self.cache_dir.display());
        Ok(())
    }

    /// Total size of cached entries in bytes.
    pub async fn size(&self) -> Result<u64> {
        let mut total = 0;
        let mut entries = fs::read_dir(self.cache_dir.join("sources")).await?;
        while let Some(entry) = entries.next_entry().await? {
            total += entry.metadata().await?.len();
        }
        Ok(total)
    }

    /// Number of cached entries.
    pub async fn len(&self) -> Result<usize> {
        let mut count = 0;
        let mut entries = fs::read_dir(self.cache_dir.join("sources")).await?;
        while entries.next_entry().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }
}

#[async_trait]
impl Transport for CachingTransport {
    async fn fetch(&self, request: &FetchRequest) -> Result<Payload> {
        if !Self::is_cacheable(&request.url) {
            return self.inner.fetch(request).await;
        }

        let path = self.entry_path(&request.url);
        if let Ok(data) = fs::read(&path).await {
            debug!(url = %request.url, "Cache hit");
            if request.binary {
                return Ok(Payload::Binary(Bytes::from(data)));
            }
            match String::from_utf8(data) {
                Ok(text) => return Ok(Payload::Text(text)),
                Err(_) => warn!(url = %request.url, "Discarding undecodable cache entry"),
            }
        }

        let payload = self.inner.fetch(request).await?;
        if let Err(e) = fs::write(&path, payload.as_bytes()).await {
            warn!(url = %request.url, "Unable to write cache entry: {e}");
        } else {
            debug!(url = %request.url, "Cached at {}", path.display());
        }
        Ok(payload)
    }
}
