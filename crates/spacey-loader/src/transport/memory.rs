// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! In-memory transport

use super::{FetchRequest, Payload, Transport};
use crate::error::{LoaderError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::trace;

/// Serves payloads from a URL table and counts every fetch.
#[derive(Default)]
pub struct MemoryTransport {
    files: DashMap<String, Payload>,
    fetches: DashMap<String, usize>,
    total: AtomicUsize,
    latency: Option<Duration>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every fetch, so concurrent requests overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn insert(&self, url: impl Into<String>, payload: impl Into<Payload>) {
        self.files.insert(url.into(), payload.into());
    }

    pub fn remove(&self, url: &str) -> Option<Payload> {
        self.files.remove(url).map(|(_, payload)| payload)
    }

    /// Fetches of `url` so far, including failed ones.
    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches.get(url).map(|count| *count).unwrap_or(0)
    }

    /// Fetches of any URL so far.
    pub fn total_fetches(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn fetch(&self, request: &FetchRequest) -> Result<Payload> {
        *self.fetches.entry(request.url.clone()).or_insert(0) += 1;
        self.total.fetch_add(1, Ordering::SeqCst);
        trace!(url = %request.url, "memory fetch");

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let payload = self
            .files
            .get(&request.url)
            .map(|entry| entry.clone())
            .ok_or_else(|| LoaderError::fetch(&request.url, "404 Not Found"))?;

        match payload {
            Payload::Text(text) if request.binary => Ok(Payload::Binary(text.into_bytes().into())),
            other => Ok(other),
        }
    }
}
