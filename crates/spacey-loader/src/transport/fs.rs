// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Filesystem transport for `file:` URLs

use super::{FetchRequest, Payload, Transport};
use crate::error::{LoaderError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, instrument};
use url::Url;

/// Reads `file:` URLs from the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct FileTransport;

impl FileTransport {
    pub fn new() -> Self {
        Self
    }

    /// Map a `file:` URL to a local path.
    pub fn path_for(url: &str) -> Result<PathBuf> {
        let parsed = Url::parse(url).map_err(|e| LoaderError::fetch(url, e))?;
        if parsed.scheme() != "file" {
            return Err(LoaderError::fetch(url, "not a file: URL"));
        }
        parsed
            .to_file_path()
            .map_err(|_| LoaderError::fetch(url, "URL does not name a local path"))
    }
}

#[async_trait]
impl Transport for FileTransport {
    #[instrument(skip(self, request), fields(url = %request.url))]
    async fn fetch(&self, request: &FetchRequest) -> Result<Payload> {
        let path = Self::path_for(&request.url)?;
        debug!("Reading {}", path.display());

        let data = fs::read(&path)
            .await
            .map_err(|e| LoaderError::fetch(&request.url, e))?;

        if request.binary {
            return Ok(Payload::Binary(Bytes::from(data)));
        }
        String::from_utf8(data)
            .map(Payload::Text)
            .map_err(|e| LoaderError::fetch(&request.url, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_file_url() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mod.js");
        std::fs::write(&path, "module.exports = 1;").unwrap();
        let url = Url::from_file_path(&path).unwrap().to_string();

        let payload = FileTransport::new().fetch(&FetchRequest::new(&url)).await.unwrap();
        assert_eq!(payload, Payload::from("module.exports = 1;"));
    }

    #[tokio::test]
    async fn test_missing_file_is_fetch_error() {
        let dir = TempDir::new().unwrap();
        let url = Url::from_file_path(dir.path().join("missing.js")).unwrap().to_string();

        let err = FileTransport::new().fetch(&FetchRequest::new(&url)).await.unwrap_err();
        assert!(matches!(err, LoaderError::Fetch { .. }));
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(FileTransport::path_for("http://example.com/a.js").is_err());
    }
}
