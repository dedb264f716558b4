// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module namespace objects.
//!
//! A namespace exposes the exports of an evaluated module. Its set of names
//! is fixed when the namespace is created, while each name reads through to
//! the live binding object, so later `export` calls by the module stay
//! visible to importers holding the namespace.

use crate::value::{Object, Value};
use std::fmt;
use std::sync::{Arc, LazyLock};

static EMPTY: LazyLock<Namespace> = LazyLock::new(|| Namespace::new(Object::new()));

/// An immutable view over a module's exports.
#[derive(Clone)]
pub struct Namespace {
    inner: Arc<Inner>,
}

struct Inner {
    keys: Vec<String>,
    bindings: Object,
    use_default: Option<Value>,
}

impl Namespace {
    /// Namespace over a live binding object; its names are captured now.
    pub fn new(bindings: Object) -> Self {
        Self {
            inner: Arc::new(Inner {
                keys: bindings.keys(),
                bindings,
                use_default: None,
            }),
        }
    }

    /// Namespace over a fresh object holding `exports`.
    pub fn from_exports<K: Into<String>>(exports: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::new(Object::from_entries(exports))
    }

    /// Namespace of a dynamic module: `exports` is what `import` hands back.
    pub(crate) fn with_default(bindings: Object, exports: Value) -> Self {
        Self {
            inner: Arc::new(Inner {
                keys: bindings.keys(),
                bindings,
                use_default: Some(exports),
            }),
        }
    }

    /// Namespace wrapping a single default export, as produced by a plugin
    /// `instantiate` hook or a dynamic module.
    pub fn from_default(exports: Value) -> Self {
        Self::with_default(Object::from_entries([("default", exports.clone())]), exports)
    }

    /// The shared empty module (`@empty`).
    pub fn empty() -> Self {
        EMPTY.clone()
    }

    pub fn is_empty_module(&self) -> bool {
        Arc::ptr_eq(&self.inner, &EMPTY.inner)
    }

    /// Read an export; names not captured at creation are absent.
    pub fn get(&self, name: &str) -> Option<Value> {
        if self.has(name) {
            self.inner.bindings.get(name)
        } else {
            None
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.inner
            .keys
            .binary_search_by(|key| key.as_str().cmp(name))
            .is_ok()
    }

    /// Export names, sorted.
    pub fn keys(&self) -> &[String] {
        &self.inner.keys
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        self.inner
            .keys
            .iter()
            .filter_map(|key| self.inner.bindings.get(key).map(|value| (key.clone(), value)))
            .collect()
    }

    pub fn default_export(&self) -> Option<Value> {
        self.get("default")
    }

    /// Whether `import` unwraps this namespace to its module's exports.
    pub fn uses_default(&self) -> bool {
        self.inner.use_default.is_some()
    }

    /// What `import` returns: a dynamic module's exports, otherwise the
    /// namespace itself.
    pub fn unwrap_default(&self) -> Value {
        match &self.inner.use_default {
            Some(exports) => exports.clone(),
            None => Value::Namespace(self.clone()),
        }
    }

    /// Read a dotted member expression starting at this namespace.
    pub fn member(&self, path: &str) -> Value {
        Value::Namespace(self.clone()).member(path)
    }

    pub fn ptr_eq(&self, other: &Namespace) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Snapshot of the current export values.
    pub fn to_object(&self) -> Object {
        Object::from_entries(self.entries())
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("keys", &self.inner.keys)
            .field("uses_default", &self.uses_default())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_fixed_values_live() {
        let bindings = Object::from_entries([("x", Value::from(1))]);
        let ns = Namespace::new(bindings.clone());

        bindings.set("x", 2);
        bindings.set("late", 3);

        assert_eq!(ns.get("x"), Some(Value::Number(2.0)));
        assert_eq!(ns.get("late"), None);
        assert_eq!(ns.keys(), ["x".to_string()]);
    }

    #[test]
    fn test_empty_singleton() {
        assert!(Namespace::empty().is_empty_module());
        assert!(Namespace::empty().ptr_eq(&Namespace::empty()));
        assert!(!Namespace::new(Object::new()).is_empty_module());
    }

    #[test]
    fn test_unwrap_default() {
        let exports = Value::from(Object::from_entries([("a", Value::from(1))]));
        let ns = Namespace::from_default(exports.clone());
        assert!(ns.uses_default());
        assert_eq!(ns.unwrap_default(), exports);

        let plain = Namespace::from_exports([("a", Value::from(1))]);
        assert!(matches!(plain.unwrap_default(), Value::Namespace(_)));
    }
}
