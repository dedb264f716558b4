// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The instantiation pipeline.
//!
//! Instantiating a key turns it into a registration attached to its load
//! record:
//!
//! ```text
//! pending registration ─┐
//! bundle import ────────┤
//! locate → fetch → translate → register ─┴─> declare / link body
//! ```
//!
//! A key whose source produces a finished module (a plugin instantiate, an
//! empty bundle) skips linking and goes straight into the registry.

mod fetch;
mod legacy;
mod translate;
pub mod wasm;

use crate::config::Format;
use crate::error::{LoaderError, Result, Stage};
use crate::evaluator::CommonJsModule;
use crate::key::ModuleKey;
use crate::loader::Loader;
use crate::metadata::Metadata;
use crate::namespace::Namespace;
use crate::plugin::{LoaderPlugin, PluginRequest};
use crate::record::{Instantiation, LoadRecord, LoadState, Linked, ModuleBody, Registration};
use crate::script::RegisterContext;
use crate::trace::LoadTrace;
use crate::value::Value;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// What loading a source produced.
pub(crate) enum Loaded {
    Module(Registration),
    Namespace(Namespace),
}

/// Instantiate `record`, caching any failure on it.
pub(crate) async fn run_instantiate(
    loader: Loader,
    record: Arc<LoadRecord>,
) -> Result<Instantiation> {
    let key = record.key().clone();
    match instantiate_record(&loader, &record).await {
        Ok(Some(namespace)) => {
            loader.inner.registry.set(key, namespace.clone());
            record.set_state(LoadState::Evaluated(namespace.clone()));
            loader.inner.records.remove_if_same(&record);
            Ok(Instantiation::Namespace(namespace))
        }
        Ok(None) => Ok(Instantiation::Record(record)),
        Err(err) => {
            let err = err.with_stage(Stage::Instantiating, &key, None);
            debug!(key = %key, "instantiate failed: {err}");
            record.set_state(LoadState::LoadFailed(err.clone()));
            Err(err)
        }
    }
}

async fn instantiate_record(
    loader: &Loader,
    record: &Arc<LoadRecord>,
) -> Result<Option<Namespace>> {
    let key = record.key();
    preload_dep_cache(loader, key);

    let mut registration = record.take_registration();
    if registration.is_none() {
        if let Some(bundle) = loader.inner.rules.bundle_for(key) {
            debug!(key = %key, bundle, "loading from bundle");
            loader.import_owned(bundle.to_string(), None).await?;
            registration = record.take_registration();
        }
    }

    let registration = match registration {
        Some(registration) => registration,
        None => match load_source(loader, key).await? {
            Loaded::Module(registration) => registration,
            Loaded::Namespace(namespace) => return Ok(Some(namespace)),
        },
    };

    link_registration(loader, record, registration)?;
    Ok(None)
}

/// Start instantiating the configured dependencies of `key` in the
/// background.
fn preload_dep_cache(loader: &Loader, key: &ModuleKey) {
    let Some(deps) = loader.inner.rules.dep_cache.get(key.as_str()) else {
        return;
    };
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };

    for dep in deps {
        let task = loader.resolve_instantiate(dep.clone(), key.clone());
        let dep = dep.clone();
        let parent = key.clone();
        handle.spawn(async move {
            if let Err(err) = task.await {
                trace!(dep, parent = %parent, "depCache preload failed: {err}");
            }
        });
    }
}

/// Fetch, translate and register the source of `key`.
async fn load_source(loader: &Loader, key: &ModuleKey) -> Result<Loaded> {
    let mut metadata = loader.metadata(key);

    let plugin = match metadata.loader.clone() {
        Some(specifier) => {
            let plugin_key = loader.resolve(&specifier, Some(key.as_str())).await?;
            let plugin = load_plugin(loader, &plugin_key, key).await?;
            metadata.loader = Some(plugin_key.to_string());
            Some(plugin)
        }
        None => None,
    };

    let address = metadata
        .plugin_argument
        .clone()
        .unwrap_or_else(|| key.to_string());
    let mut request = PluginRequest {
        name: key.clone(),
        address,
        source: None,
        metadata,
    };

    if let Some(plugin) = &plugin {
        if let Some(address) = plugin.locate(&request).await? {
            trace!(key = %key, address, "plugin located");
            request.address = address;
        }
    }

    let payload = fetch::fetch(loader, plugin.as_ref(), &request).await?;

    if wasm::is_wasm(payload.as_bytes()) {
        record_trace(loader, &request);
        return wasm::registration(loader, key, payload.as_bytes()).map(Loaded::Module);
    }
    if request.metadata.format == Some(Format::Wasm) {
        return Err(LoaderError::load(format!(
            "Module {key} is not a WebAssembly binary"
        )));
    }

    request.source = Some(payload.into_text());
    translate::translate(loader, plugin.as_ref(), &mut request).await?;

    if let Some(plugin) = &plugin {
        if let Some(value) = plugin.instantiate(&request).await? {
            record_trace(loader, &request);
            return Ok(Loaded::Module(Registration::dynamic(
                Vec::new(),
                true,
                move |_, module| {
                    module.set_exports(value);
                    Ok(())
                },
            )));
        }
    }

    record_trace(loader, &request);
    let source = request.source.as_deref().unwrap_or_default();
    let metadata = &request.metadata;
    match metadata.format.unwrap_or(Format::Global) {
        Format::Register | Format::System | Format::Esm => {
            register_script(loader, key, source, metadata)
        }
        Format::Cjs => Ok(Loaded::Module(legacy::commonjs(loader, key, source, metadata))),
        Format::Amd => legacy::amd(loader, key, source, metadata),
        Format::Global => Ok(Loaded::Module(legacy::global(loader, key, source, metadata))),
        Format::Wasm => Err(LoaderError::load(format!(
            "Module {key} is not a WebAssembly binary"
        ))),
    }
}

/// Import a plugin module and take its plugin export.
pub(crate) async fn load_plugin(
    loader: &Loader,
    plugin_key: &ModuleKey,
    key: &ModuleKey,
) -> Result<Arc<dyn LoaderPlugin>> {
    let namespace = loader
        .import_owned(plugin_key.to_string(), Some(key.to_string()))
        .await?;
    Value::Namespace(namespace).as_plugin().ok_or_else(|| {
        LoaderError::shape(format!(
            "Module {plugin_key} is not a valid loader plugin (loading {key})"
        ))
    })
}

/// Run a register-format source and claim its registrations.
fn register_script(
    loader: &Loader,
    key: &ModuleKey,
    source: &str,
    metadata: &Metadata,
) -> Result<Loaded> {
    let mut ctx = RegisterContext::new(key.clone());
    loader
        .inner
        .scripts
        .eval_register(source, key, &mut ctx)
        .map_err(LoaderError::script)?;

    let (anonymous, named) = ctx.into_parts()?;
    let bundled = !named.is_empty();
    match claim_named(loader, key, anonymous, named)? {
        Some(registration) => Ok(Loaded::Module(registration)),
        None if bundled || metadata.bundle || loader.inner.rules.is_bundle(key) => {
            Ok(Loaded::Namespace(Namespace::empty()))
        }
        None => Err(LoaderError::shape(format!("Module {key} did not instantiate"))),
    }
}

/// Hand named registrations to their records. One named after `key` itself
/// stands in for a missing anonymous registration.
pub(crate) fn claim_named(
    loader: &Loader,
    key: &ModuleKey,
    mut anonymous: Option<Registration>,
    named: Vec<(String, Registration)>,
) -> Result<Option<Registration>> {
    for (name, registration) in named {
        let name_key = ModuleKey::from(loader.inner.rules.resolve_sync(&name, None)?);
        if name_key == *key {
            if anonymous.is_none() {
                anonymous = Some(registration);
            } else {
                warn!(key = %key, "ignoring named registration shadowed by an anonymous one");
            }
            continue;
        }
        trace!(bundle = %key, name = %name_key, "named registration");
        loader.accept_registration(&name_key, registration);
    }
    Ok(anonymous)
}

/// Call the declare function (or wrap the dynamic body) and attach the
/// result to the record.
fn link_registration(
    loader: &Loader,
    record: &Arc<LoadRecord>,
    registration: Registration,
) -> Result<()> {
    let key = record.key();
    let link = record
        .link()
        .ok_or_else(|| LoaderError::shape(format!("Module {key} is no longer linking")))?;

    if loader.inner.config.trace {
        loader
            .inner
            .traces
            .entry(key.clone())
            .or_insert_with(|| LoadTrace::new(key.as_str()))
            .dependencies = registration.dependencies().to_vec();
    }

    let linked = match registration {
        Registration::Declarative { deps, declare } => {
            let exporter = record.exporter(link.bindings().clone());
            let declaration = declare(exporter, loader.context(key)).map_err(LoaderError::script)?;
            if declaration.setters.len() > deps.len() {
                return Err(LoaderError::shape(format!(
                    "Module {key} declares {} setters for {} dependencies",
                    declaration.setters.len(),
                    deps.len()
                )));
            }
            Linked {
                dependencies: deps,
                body: ModuleBody::Declarative {
                    setters: declaration.setters,
                    execute: Mutex::new(declaration.execute),
                },
            }
        }
        Registration::Dynamic {
            deps,
            executing_require,
            execute,
        } => Linked {
            dependencies: deps,
            body: ModuleBody::Dynamic {
                executing_require,
                execute: Mutex::new(Some(execute)),
                module: CommonJsModule::new(key.clone(), link.bindings().clone()),
            },
        },
    };

    link.set_linked(key, linked)
}

fn record_trace(loader: &Loader, request: &PluginRequest) {
    if !loader.inner.config.trace {
        return;
    }
    let mut entry = loader
        .inner
        .traces
        .entry(request.name.clone())
        .or_insert_with(|| LoadTrace::new(request.name.as_str()));
    entry.address = Some(request.address.clone());
    entry.format = request.metadata.format;
    entry.metadata = request.metadata.clone();
}
