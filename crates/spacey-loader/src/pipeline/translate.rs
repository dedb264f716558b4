// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The translate stage: prologue directives, plugin translation, format
//! detection and transpilation of ES module sources.

use crate::config::Format;
use crate::error::{LoaderError, Result};
use crate::loader::Loader;
use crate::plugin::{LoaderPlugin, PluginRequest};
use crate::source;
use std::sync::Arc;
use tracing::{debug, trace};

pub(super) async fn translate(
    loader: &Loader,
    plugin: Option<&Arc<dyn LoaderPlugin>>,
    request: &mut PluginRequest,
) -> Result<()> {
    let detection = source::detect(request.source.as_deref().unwrap_or_default());
    request.metadata.apply_directives(&detection.prologue.directives)?;
    if detection.bundle {
        request.metadata.bundle = true;
    }

    if let Some(plugin) = plugin {
        plugin.translate(request).await?;
    }

    if request.metadata.format.is_none() {
        // The plugin may have replaced the source.
        let format = match plugin {
            Some(_) => source::detect_format(request.source.as_deref().unwrap_or_default()),
            None => detection.format,
        };
        trace!(key = %request.name, %format, "detected format");
        request.metadata.format = Some(format);
    }

    if request.metadata.format == Some(Format::Esm) {
        transpile(loader, request).await?;
    }
    Ok(())
}

/// Hand an ES module source to the configured transpiler plugin.
async fn transpile(loader: &Loader, request: &mut PluginRequest) -> Result<()> {
    let Some(transpiler) = loader.inner.config.transpiler.clone() else {
        return Err(LoaderError::load(format!(
            "Unable to load {}: ES module syntax needs a transpiler to be configured",
            request.name
        )));
    };

    let transpiler_key = loader.resolve(&transpiler, None).await?;
    let plugin = super::load_plugin(loader, &transpiler_key, &request.name).await?;
    debug!(key = %request.name, transpiler = %transpiler_key, "transpiling");
    plugin.translate(request).await?;

    if request.metadata.format == Some(Format::Esm) {
        request.metadata.format = Some(Format::Register);
    }
    Ok(())
}
