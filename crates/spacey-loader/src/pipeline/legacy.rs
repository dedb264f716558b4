// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Registrations for CommonJS, AMD and global scripts.
//!
//! All three become dynamic registrations whose body runs the source
//! through the [`ScriptEvaluator`](crate::script::ScriptEvaluator).

use super::Loaded;
use crate::error::{LoaderError, Result};
use crate::evaluator::{CommonJsModule, Require};
use crate::key::ModuleKey;
use crate::loader::Loader;
use crate::metadata::Metadata;
use crate::namespace::Namespace;
use crate::record::Registration;
use crate::script::{AmdArgs, AmdFactory, AmdScope, CommonJsScope, GlobalScope};
use crate::source;
use crate::value::{Object, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::trace;

/// AMD dependency names that refer to the module itself.
const AMD_PSEUDO_DEPS: [&str; 3] = ["require", "exports", "module"];

pub(super) fn commonjs(
    loader: &Loader,
    key: &ModuleKey,
    source: &str,
    metadata: &Metadata,
) -> Registration {
    let mut deps = metadata.deps.clone();
    if metadata.cjs_require_detection {
        for dep in source::require_specifiers(source) {
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
    }
    trace!(key = %key, deps = deps.len(), "commonjs registration");

    let scripts = loader.inner.scripts.clone();
    let source = source.to_string();
    let key = key.clone();
    let filename = key.to_string();
    let dirname = match filename.rfind('/') {
        Some(index) => filename[..index].to_string(),
        None => String::new(),
    };
    let es_module = metadata.es_module;

    Registration::dynamic(deps, !metadata.eager_require, move |require, module| {
        if es_module {
            module.mark_es_module();
        }
        let scope = CommonJsScope {
            key: &key,
            require,
            module,
            filename: &filename,
            dirname: &dirname,
        };
        scripts.eval_commonjs(&source, &scope)
    })
}

/// Run an AMD script now and register its `define` calls.
pub(super) fn amd(
    loader: &Loader,
    key: &ModuleKey,
    source: &str,
    metadata: &Metadata,
) -> Result<Loaded> {
    let mut scope = AmdScope::new();
    loader
        .inner
        .scripts
        .eval_amd(source, key, &mut scope)
        .map_err(LoaderError::script)?;

    let mut anonymous = None;
    let mut named = Vec::new();
    for define in scope.into_defines() {
        let registration = amd_registration(define.deps, define.factory, &metadata.deps);
        match define.name {
            Some(name) => named.push((name, registration)),
            None if anonymous.is_none() => anonymous = Some(registration),
            None => {
                return Err(LoaderError::shape(format!(
                    "Multiple anonymous defines in module {key}"
                )));
            }
        }
    }

    // A lone named define is the module itself.
    if anonymous.is_none() && named.len() == 1 && !metadata.bundle {
        anonymous = named.pop().map(|(_, registration)| registration);
    }

    let bundled = !named.is_empty();
    match super::claim_named(loader, key, anonymous, named)? {
        Some(registration) => Ok(Loaded::Module(registration)),
        None if bundled || metadata.bundle => Ok(Loaded::Namespace(Namespace::empty())),
        None => Err(LoaderError::shape(format!("Module {key} did not define anything"))),
    }
}

fn amd_registration(deps: Vec<String>, factory: AmdFactory, meta_deps: &[String]) -> Registration {
    let mut module_deps: Vec<String> = deps
        .iter()
        .filter(|dep| !AMD_PSEUDO_DEPS.contains(&dep.as_str()))
        .cloned()
        .collect();
    for dep in meta_deps {
        if !module_deps.contains(dep) {
            module_deps.push(dep.clone());
        }
    }

    Registration::dynamic(module_deps, false, move |require, module| {
        let values = deps
            .iter()
            .map(|dep| amd_argument(dep, require, module))
            .collect::<Result<Vec<_>>>()?;
        if let Some(value) = factory(AmdArgs {
            values,
            require,
            module,
        })? {
            module.set_exports(value);
        }
        Ok(())
    })
}

fn amd_argument(dep: &str, require: &Require<'_>, module: &CommonJsModule) -> Result<Value> {
    match dep {
        "require" => Ok(Value::Undefined),
        "exports" => Ok(module.exports()),
        "module" => Ok(Value::Native(Arc::new(module.clone()))),
        dep => require.require(dep),
    }
}

/// A global script: inject `meta.globals`, run, restore, then export
/// `meta.exports` or whatever the script added to the global object.
pub(super) fn global(
    loader: &Loader,
    key: &ModuleKey,
    source: &str,
    metadata: &Metadata,
) -> Registration {
    let mut deps = metadata.deps.clone();
    for specifier in metadata.globals.values() {
        if !deps.contains(specifier) {
            deps.push(specifier.clone());
        }
    }

    let scripts = loader.inner.scripts.clone();
    let globals = loader.inner.globals.clone();
    let source = source.to_string();
    let key = key.clone();
    let injected = metadata.globals.clone();
    let exports = metadata.exports.clone();

    Registration::dynamic(deps, false, move |require, module| {
        let mut saved = Vec::with_capacity(injected.len());
        for (name, specifier) in &injected {
            let value = require.require(specifier)?;
            saved.push((name.clone(), globals.set(name.clone(), value)));
        }
        let before: BTreeSet<String> = globals.keys().into_iter().collect();

        let result = scripts.eval_global(
            &source,
            &GlobalScope {
                key: &key,
                globals: &globals,
            },
        );

        let added: Vec<String> = globals
            .keys()
            .into_iter()
            .filter(|name| !before.contains(name))
            .collect();
        for (name, previous) in saved.into_iter().rev() {
            match previous {
                Some(value) => {
                    globals.set(name, value);
                }
                None => {
                    globals.remove(&name);
                }
            }
        }
        result?;

        match &exports {
            Some(path) => module.set_exports(Value::Object(globals.clone()).member(path)),
            None => match added.as_slice() {
                [] => {}
                [name] => module.set_exports(globals.get(name).unwrap_or_default()),
                names => {
                    let object = Object::new();
                    for name in names {
                        object.set(name.clone(), globals.get(name).unwrap_or_default());
                    }
                    module.set_exports(object);
                }
            },
        }
        Ok(())
    })
}
