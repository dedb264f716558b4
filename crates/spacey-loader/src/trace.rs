// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Load traces, recorded when `trace` is enabled.

use crate::config::Format;
use crate::metadata::Metadata;
use serde::Serialize;
use std::collections::BTreeMap;

/// What the loader learned about one module.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadTrace {
    pub key: String,
    /// URL the source was fetched from, if any
    pub address: Option<String>,
    pub format: Option<Format>,
    /// Dependency specifiers, as registered
    pub dependencies: Vec<String>,
    /// Dependency specifier -> resolved key
    pub dep_map: BTreeMap<String, String>,
    pub metadata: Metadata,
}

impl LoadTrace {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    /// Dependencies resolved so far, in declaration order.
    pub fn resolved_dependencies(&self) -> Vec<&str> {
        self.dependencies
            .iter()
            .filter_map(|dep| self.dep_map.get(dep).map(String::as_str))
            .collect()
    }
}
