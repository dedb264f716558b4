// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Loader plugins.
//!
//! A plugin is a module whose export is a [`Value::Plugin`]. Keys written as
//! `arg!plugin` (or configured through `meta.loader`) are loaded through the
//! plugin's hooks, which wrap the default pipeline stages:
//!
//! ```text
//! locate -> fetch(default fetch) -> translate -> instantiate
//! ```
//!
//! Every hook has a pass-through default.
//!
//! [`Value::Plugin`]: crate::Value::Plugin

use crate::error::Result;
use crate::key::ModuleKey;
use crate::metadata::Metadata;
use crate::transport::Payload;
use crate::value::Value;
use async_trait::async_trait;

/// The load a plugin hook operates on.
#[derive(Debug, Clone)]
pub struct PluginRequest {
    /// Key being loaded
    pub name: ModuleKey,
    /// URL to fetch from
    pub address: String,
    /// Source text once fetched
    pub source: Option<String>,
    pub metadata: Metadata,
}

/// The next fetch layer, handed to [`LoaderPlugin::fetch`].
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &PluginRequest) -> Result<Payload>;
}

/// Hooks a plugin module may provide.
#[async_trait]
pub trait LoaderPlugin: Send + Sync {
    /// Return a different address to fetch from.
    async fn locate(&self, _request: &PluginRequest) -> Result<Option<String>> {
        Ok(None)
    }

    /// Produce the payload, usually by delegating to `fetcher`.
    async fn fetch(&self, request: &PluginRequest, fetcher: &dyn Fetcher) -> Result<Payload> {
        fetcher.fetch(request).await
    }

    /// Rewrite `request.source` and, if needed, `request.metadata.format`.
    async fn translate(&self, _request: &mut PluginRequest) -> Result<()> {
        Ok(())
    }

    /// Return the module's exports directly, bypassing registration.
    async fn instantiate(&self, _request: &PluginRequest) -> Result<Option<Value>> {
        Ok(None)
    }
}
