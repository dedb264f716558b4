// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Conditional specifiers.
//!
//! - `lib.js#?feature|enabled` loads `lib.js` when the condition is true and
//!   `@empty` otherwise
//! - `lang/#{locale|code}.js` substitutes a string-valued condition
//!
//! A condition names a module and an export (`module|export`, `~` negates).
//! Bare environment names (`browser`, `production`, ...) read `@system-env`.

use crate::config::SystemEnv;
use crate::error::{LoaderError, Result};
use crate::loader::Loader;
use crate::registry::{EMPTY_MODULE, SYSTEM_ENV_MODULE};
use crate::value::Value;
use std::ops::Range;
use tracing::trace;

/// A parsed `module|export` condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Condition {
    pub module: String,
    pub export: String,
    pub negate: bool,
}

impl Condition {
    pub(crate) fn parse(text: &str) -> Self {
        if let Some(bar) = text.rfind('|') {
            let export = &text[bar + 1..];
            let (negate, export) = match export.strip_prefix('~') {
                Some(rest) => (true, rest),
                None => (false, export),
            };
            return Self {
                module: non_empty_module(&text[..bar]),
                export: export.to_string(),
                negate,
            };
        }

        let (negate, module) = match text.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        if SystemEnv::FLAGS.contains(&module) {
            Self {
                module: SYSTEM_ENV_MODULE.to_string(),
                export: module.to_string(),
                negate,
            }
        } else {
            Self {
                module: non_empty_module(module),
                export: "default".to_string(),
                negate,
            }
        }
    }

    /// Import the condition module and read the export.
    async fn read(&self, loader: &Loader, parent: Option<&str>) -> Result<Value> {
        let namespace = loader
            .import_owned(self.module.clone(), parent.map(str::to_string))
            .await?;
        Ok(namespace.member(&self.export))
    }
}

fn non_empty_module(module: &str) -> String {
    if module.is_empty() {
        SYSTEM_ENV_MODULE.to_string()
    } else {
        module.to_string()
    }
}

/// Split `spec#?cond` into the specifier and the condition.
pub(crate) fn split_boolean(specifier: &str) -> Option<(&str, &str)> {
    let index = specifier.rfind("#?")?;
    Some((&specifier[..index], &specifier[index + 2..]))
}

/// Locate the first `#{cond}` in a key.
pub(crate) fn find_interpolation(key: &str) -> Option<(Range<usize>, &str)> {
    let start = key.find("#{")?;
    let len = key[start + 2..].find('}')?;
    if len == 0 {
        return None;
    }
    let end = start + 2 + len + 1;
    Some((start..end, &key[start + 2..end - 1]))
}

/// Apply a boolean condition, yielding the specifier or `@empty`.
pub(crate) async fn resolve_boolean(
    loader: &Loader,
    specifier: &str,
    condition: &str,
    parent: Option<&str>,
) -> Result<String> {
    let condition = Condition::parse(condition);
    let value = condition.read(loader, parent).await?;
    let Some(flag) = value.as_bool() else {
        return Err(LoaderError::resolution(format!(
            "Condition {}|{} for {specifier} did not resolve to a boolean ({})",
            condition.module,
            condition.export,
            value.type_of()
        )));
    };

    let enabled = flag != condition.negate;
    trace!(specifier, enabled, "boolean condition");
    Ok(if enabled {
        specifier.to_string()
    } else {
        EMPTY_MODULE.to_string()
    })
}

/// Substitute every `#{cond}` in `key`.
pub(crate) async fn interpolate(
    loader: &Loader,
    key: String,
    parent: Option<&str>,
) -> Result<String> {
    let mut key = key;
    while let Some((range, condition)) = find_interpolation(&key) {
        let condition = Condition::parse(condition);
        let value = condition.read(loader, parent).await?;
        let Some(text) = value.as_str() else {
            return Err(LoaderError::resolution(format!(
                "The condition value for {key} doesn't resolve to a string"
            )));
        };
        if text.contains('/') {
            return Err(LoaderError::resolution(format!(
                "Unable to interpolate conditional {key}: \
                 the condition value {text} cannot contain a \"/\" separator"
            )));
        }
        let text = text.to_string();
        key.replace_range(range, &text);
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_module_and_export() {
        let condition = Condition::parse("./features.js|webgl.enabled");
        assert_eq!(condition.module, "./features.js");
        assert_eq!(condition.export, "webgl.enabled");
        assert!(!condition.negate);

        let condition = Condition::parse("flags|~legacy");
        assert_eq!(condition.export, "legacy");
        assert!(condition.negate);
    }

    #[test]
    fn test_parse_environment_names() {
        let condition = Condition::parse("~production");
        assert_eq!(condition.module, SYSTEM_ENV_MODULE);
        assert_eq!(condition.export, "production");
        assert!(condition.negate);

        let condition = Condition::parse("./has-worker.js");
        assert_eq!(condition.export, "default");
    }

    #[test]
    fn test_split_boolean_uses_last_marker() {
        assert_eq!(split_boolean("./a.js#?browser"), Some(("./a.js", "browser")));
        assert_eq!(split_boolean("./a.js"), None);
    }

    #[test]
    fn test_find_interpolation() {
        let key = "http://x/lang/#{locale|code}.js";
        let (range, condition) = find_interpolation(key).unwrap();
        assert_eq!(condition, "locale|code");
        assert_eq!(&key[range], "#{locale|code}");
        assert!(find_interpolation("http://x/#{}.js").is_none());
    }
}
