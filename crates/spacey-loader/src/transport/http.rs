// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! HTTP transport.

use super::{FetchRequest, Payload, Transport};
use crate::error::{LoaderError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

/// Fetches `http:` and `https:` URLs.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a client with a per-request timeout in seconds.
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(20)
            .user_agent(format!("spacey-loader/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LoaderError::load(format!("Unable to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, request), fields(url = %request.url))]
    async fn fetch(&self, request: &FetchRequest) -> Result<Payload> {
        debug!("Fetching module source");

        let mut builder = self.client.get(&request.url);
        if let Some(authorization) = &request.authorization {
            builder = builder.header(reqwest::header::AUTHORIZATION, authorization);
        }
        if !request.binary {
            builder = builder.header(reqwest::header::ACCEPT, "application/x-es-module, */*");
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LoaderError::fetch(&request.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoaderError::fetch(&request.url, status));
        }

        if request.binary {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| LoaderError::fetch(&request.url, e))?;
            Ok(Payload::Binary(bytes))
        } else {
            let text = response
                .text()
                .await
                .map_err(|e| LoaderError::fetch(&request.url, e))?;
            Ok(Payload::Text(text))
        }
    }
}
