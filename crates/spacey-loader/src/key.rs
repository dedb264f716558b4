// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Canonical module keys

use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Prefix of host built-in modules, which bypass resolution.
pub const HOST_BUILTIN_PREFIX: &str = "@node/";

/// Canonical, absolute identity of a module.
///
/// Keys are produced by resolution; two equal keys always denote the same
/// module. Cloning is cheap.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleKey(Arc<str>);

impl ModuleKey {
    /// Wrap an already-canonical key
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key names a host built-in (`@node/...`)
    pub fn is_host_builtin(&self) -> bool {
        self.0.starts_with(HOST_BUILTIN_PREFIX)
    }
}

impl Deref for ModuleKey {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ModuleKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ModuleKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl From<&str> for ModuleKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ModuleKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

impl From<&ModuleKey> for ModuleKey {
    fn from(key: &ModuleKey) -> Self {
        key.clone()
    }
}

impl PartialEq<str> for ModuleKey {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for ModuleKey {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}
