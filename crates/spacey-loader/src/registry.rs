// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Registry of evaluated module namespaces.

use crate::key::ModuleKey;
use crate::namespace::Namespace;
use crate::record::RecordStore;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Key of the built-in empty module.
pub const EMPTY_MODULE: &str = "@empty";
/// Key of the built-in environment module.
pub const SYSTEM_ENV_MODULE: &str = "@system-env";

/// Thread-safe map from module key to namespace.
///
/// Only namespaces can be stored. Deleting a key also evicts its load
/// record, so a cached failure for that key is forgotten.
pub struct Registry {
    modules: DashMap<ModuleKey, Namespace>,
    records: Arc<RecordStore>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::with_records(Arc::new(RecordStore::new()))
    }

    pub(crate) fn with_records(records: Arc<RecordStore>) -> Self {
        Self {
            modules: DashMap::new(),
            records,
        }
    }

    /// Get a namespace by key
    pub fn get(&self, key: &str) -> Option<Namespace> {
        self.modules.get(key).map(|entry| entry.clone())
    }

    /// Check if a key is registered
    pub fn has(&self, key: &str) -> bool {
        self.modules.contains_key(key)
    }

    /// Register a namespace, returning the one it replaced
    pub fn set(&self, key: impl Into<ModuleKey>, namespace: Namespace) -> Option<Namespace> {
        self.modules.insert(key.into(), namespace)
    }

    /// Remove a key and its load record
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.modules.remove(key).is_some();
        let evicted = self.records.remove(key).is_some();
        if removed || evicted {
            debug!(key, removed, evicted, "registry delete");
        }
        removed || evicted
    }

    /// Get all registered keys
    pub fn keys(&self) -> Vec<ModuleKey> {
        self.modules.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Get all registered namespaces
    pub fn values(&self) -> Vec<Namespace> {
        self.modules.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Get the number of registered modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
