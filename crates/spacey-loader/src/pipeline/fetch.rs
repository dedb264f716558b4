// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The fetch stage.

use crate::config::{Format, LoaderConfig};
use crate::error::{LoaderError, Result};
use crate::integrity;
use crate::loader::Loader;
use crate::plugin::{Fetcher, LoaderPlugin, PluginRequest};
use crate::transport::{FetchRequest, Payload};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{trace, warn};

/// Fetch through the transport, honoring `authorization` and `integrity`.
struct DefaultFetch<'a> {
    loader: &'a Loader,
}

#[async_trait]
impl Fetcher for DefaultFetch<'_> {
    async fn fetch(&self, request: &PluginRequest) -> Result<Payload> {
        let metadata = &request.metadata;
        let fetch = FetchRequest {
            url: request.address.clone(),
            authorization: metadata.authorization.clone(),
            integrity: metadata.integrity.clone(),
            binary: metadata.format == Some(Format::Wasm) || request.address.ends_with(".wasm"),
        };

        if let Some(message) = local_fetch_warning(&self.loader.inner.config, &fetch) {
            warn!(url = %fetch.url, "{message}");
        }

        trace!(url = %fetch.url, binary = fetch.binary, "fetching");
        let payload = self.loader.inner.transport.fetch(&fetch).await?;

        if let Some(expected) = &fetch.integrity {
            if !integrity::verify(payload.as_bytes(), expected) {
                return Err(LoaderError::IntegrityMismatch {
                    url: fetch.url,
                    expected: expected.clone(),
                });
            }
        }
        Ok(payload)
    }
}

/// Developer warning for a fetch from a `file:` URL, when `warnings` is on.
fn local_fetch_warning(config: &LoaderConfig, fetch: &FetchRequest) -> Option<&'static str> {
    if !config.warnings || !fetch.url.starts_with("file:") {
        return None;
    }
    Some(match fetch.authorization {
        Some(_) => "module loaded from a file: URL; authorization is ignored",
        None => "module loaded from a file: URL",
    })
}

/// Fetch `request.address`, through the plugin's fetch hook when present.
pub(super) async fn fetch(
    loader: &Loader,
    plugin: Option<&Arc<dyn LoaderPlugin>>,
    request: &PluginRequest,
) -> Result<Payload> {
    let fetcher = DefaultFetch { loader };
    match plugin {
        Some(plugin) => plugin.fetch(request, &fetcher).await,
        None => fetcher.fetch(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::key::ModuleKey;
    use crate::metadata::Metadata;
    use crate::transport::MemoryTransport;

    fn request(address: &str, integrity: Option<String>) -> PluginRequest {
        PluginRequest {
            name: ModuleKey::from(address),
            address: address.to_string(),
            source: None,
            metadata: Metadata {
                integrity,
                ..Default::default()
            },
        }
    }

    fn loader(transport: MemoryTransport) -> Loader {
        Loader::builder()
            .config(LoaderConfig::default())
            .transport(Arc::new(transport))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_integrity_checked() {
        let transport = MemoryTransport::new();
        transport.insert("http://x/a.js", "export default 1");
        let loader = loader(transport);

        let good = integrity::compute(b"export default 1");
        let payload = fetch(&loader, None, &request("http://x/a.js", Some(good)))
            .await
            .unwrap();
        assert_eq!(payload.as_bytes(), b"export default 1");

        let bad = integrity::compute(b"something else");
        let err = fetch(&loader, None, &request("http://x/a.js", Some(bad)))
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::IntegrityMismatch { .. }));
        assert_eq!(err.kind(), ErrorKind::Load);
    }

    #[test]
    fn test_file_url_warning() {
        let quiet = LoaderConfig::default();
        let warnings = LoaderConfig {
            warnings: true,
            ..Default::default()
        };
        let local = FetchRequest::new("file:///app/a.js");
        let remote = FetchRequest::new("http://x/a.js");
        let with_auth = FetchRequest {
            authorization: Some("Basic abc".into()),
            ..FetchRequest::new("file:///app/a.js")
        };

        assert_eq!(local_fetch_warning(&quiet, &local), None);
        assert_eq!(local_fetch_warning(&warnings, &remote), None);
        assert_eq!(
            local_fetch_warning(&warnings, &local),
            Some("module loaded from a file: URL")
        );
        assert!(
            local_fetch_warning(&warnings, &with_auth)
                .is_some_and(|message| message.contains("authorization is ignored"))
        );
    }
}
