// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Effective per-key load metadata.

use crate::config::{Format, MetaConfig};
use crate::error::Result;
use crate::source::MetaDirective;
use serde::Serialize;
use std::collections::BTreeMap;

/// Metadata for one key, merged from configuration and source directives.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub format: Option<Format>,
    /// Plugin specifier, or resolved plugin key after resolution
    pub loader: Option<String>,
    pub deps: Vec<String>,
    pub exports: Option<String>,
    pub globals: BTreeMap<String, String>,
    pub integrity: Option<String>,
    pub authorization: Option<String>,
    pub es_module: bool,
    pub cjs_require_detection: bool,
    pub eager_require: bool,
    pub bundle: bool,
    /// Key the plugin loads, for `arg!plugin` keys
    pub plugin_argument: Option<String>,
    /// Package the key belongs to
    pub package: Option<String>,
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            format: None,
            loader: None,
            deps: Vec::new(),
            exports: None,
            globals: BTreeMap::new(),
            integrity: None,
            authorization: None,
            es_module: false,
            cjs_require_detection: true,
            eager_require: false,
            bundle: false,
            plugin_argument: None,
            package: None,
            extra: BTreeMap::new(),
        }
    }
}

impl Metadata {
    /// Overlay configured metadata; set fields of `meta` win.
    pub fn apply(&mut self, meta: &MetaConfig) {
        if meta.format.is_some() {
            self.format = meta.format;
        }
        if meta.loader.is_some() {
            self.loader = meta.loader.clone();
        }
        if meta.exports.is_some() {
            self.exports = meta.exports.clone();
        }
        if meta.integrity.is_some() {
            self.integrity = meta.integrity.clone();
        }
        if meta.authorization.is_some() {
            self.authorization = meta.authorization.clone();
        }
        for dep in &meta.deps {
            self.add_dep(dep);
        }
        self.globals
            .extend(meta.globals.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(flag) = meta.es_module {
            self.es_module = flag;
        }
        if let Some(flag) = meta.cjs_require_detection {
            self.cjs_require_detection = flag;
        }
        if let Some(flag) = meta.eager_require {
            self.eager_require = flag;
        }
        if let Some(flag) = meta.bundle {
            self.bundle = flag;
        }
        self.extra
            .extend(meta.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    /// Apply directives read from a source prologue. Directives never
    /// override configured values.
    pub fn apply_directives(&mut self, directives: &[MetaDirective]) -> Result<()> {
        for directive in directives {
            match directive {
                MetaDirective::Format(name) => {
                    if self.format.is_none() {
                        self.format = Some(name.parse()?);
                    }
                }
                MetaDirective::Deps(dep) => self.add_dep(dep),
                MetaDirective::Exports(name) => {
                    if self.exports.is_none() {
                        self.exports = Some(name.clone());
                    }
                }
                MetaDirective::Global { name, specifier } => {
                    self.globals
                        .entry(name.clone())
                        .or_insert_with(|| specifier.clone());
                }
                MetaDirective::Append { name, value } => {
                    let entry = self
                        .extra
                        .entry(name.clone())
                        .or_insert_with(|| serde_json::Value::Array(Vec::new()));
                    if let serde_json::Value::Array(items) = entry {
                        items.push(serde_json::Value::String(value.clone()));
                    }
                }
                MetaDirective::Set { name, value } => match name.as_str() {
                    "loader" if self.loader.is_none() => self.loader = Some(value.clone()),
                    "integrity" if self.integrity.is_none() => self.integrity = Some(value.clone()),
                    "loader" | "integrity" => {}
                    _ => {
                        self.extra
                            .entry(name.clone())
                            .or_insert_with(|| serde_json::Value::String(value.clone()));
                    }
                },
                MetaDirective::Bundle => self.bundle = true,
                MetaDirective::Flag(name) => match name.as_str() {
                    "esModule" => self.es_module = true,
                    "eagerRequire" => self.eager_require = true,
                    _ => {
                        self.extra
                            .entry(name.clone())
                            .or_insert(serde_json::Value::Bool(true));
                    }
                },
            }
        }
        Ok(())
    }

    pub fn add_dep(&mut self, dep: &str) {
        if !self.deps.iter().any(|existing| existing == dep) {
            self.deps.push(dep.to_string());
        }
    }
}
