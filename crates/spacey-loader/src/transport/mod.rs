// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Transports deliver module sources to the loader.
//!
//! The engine never performs I/O itself. Every fetch goes through a
//! [`Transport`], which is chosen by the embedder:
//!
//! - [`MemoryTransport`]: an in-memory table, used by tests and bundlers
//! - [`FileTransport`]: `file:` URLs read with tokio's filesystem API
//! - [`HttpTransport`]: `http(s):` URLs (behind the `http` feature)
//! - [`SchemeTransport`]: routes by URL scheme to one of the above
//! - [`CachingTransport`]: stores fetched payloads in a local directory
//!
//! Timeouts are the transport's business; the engine waits as long as the
//! transport does.

mod cache;
mod fs;
#[cfg(feature = "http")]
mod http;
mod memory;

pub use cache::CachingTransport;
pub use fs::FileTransport;
#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use memory::MemoryTransport;

use crate::error::{LoaderError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// A single fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    /// Sent as the `Authorization` header where the transport supports it
    pub authorization: Option<String>,
    /// SRI string; the pipeline verifies it after the fetch
    pub integrity: Option<String>,
    /// Ask for raw bytes instead of text
    pub binary: bool,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Fetched module payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(bytes) => bytes,
        }
    }

    /// Decode as UTF-8 text, replacing invalid sequences.
    pub fn into_text(self) -> String {
        match self {
            Payload::Text(text) => text,
            Payload::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(bytes))
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Binary(bytes)
    }
}

/// Environment-specific source of module payloads.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Payload>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn fetch(&self, request: &FetchRequest) -> Result<Payload> {
        (**self).fetch(request).await
    }
}

/// Routes requests by URL scheme.
#[derive(Default)]
pub struct SchemeTransport {
    routes: Vec<(String, Arc<dyn Transport>)>,
}

impl SchemeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route URLs starting with `scheme` (e.g. `"file:"`) to `transport`.
    pub fn route(mut self, scheme: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        self.routes.push((scheme.into(), transport));
        self
    }

    /// `file:` through the filesystem and, with the `http` feature, `http:`
    /// and `https:` through reqwest.
    pub fn standard(timeout_secs: u64) -> Result<Self> {
        let transport = Self::new().route("file:", Arc::new(FileTransport::new()));
        #[cfg(feature = "http")]
        let transport = {
            let http: Arc<dyn Transport> = Arc::new(HttpTransport::new(timeout_secs)?);
            transport.route("http:", http.clone()).route("https:", http)
        };
        #[cfg(not(feature = "http"))]
        let _ = timeout_secs;
        Ok(transport)
    }
}

#[async_trait]
impl Transport for SchemeTransport {
    async fn fetch(&self, request: &FetchRequest) -> Result<Payload> {
        let transport = self
            .routes
            .iter()
            .find(|(scheme, _)| request.url.starts_with(scheme.as_str()))
            .map(|(_, transport)| transport)
            .ok_or_else(|| {
                LoaderError::fetch(&request.url, "no transport registered for this URL scheme")
            })?;
        transport.fetch(request).await
    }
}
