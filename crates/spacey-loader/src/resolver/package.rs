// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Package resolution: main entry, package maps, default extensions and
//! on-demand `package.json` configuration.

use super::Rules;
use super::url::get_map_match;
use crate::config::{MetaConfig, PackageConfig};
use crate::error::Result;
use std::collections::BTreeMap;

/// Outcome of applying a package's configuration to a subpath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PackageStep {
    /// Final key
    Resolved(String),
    /// A package map pointed elsewhere; resolve `specifier` against `parent`
    Remap { specifier: String, parent: String },
}

/// Longest package whose root is `key` or a `/`-bounded prefix of it.
pub(crate) fn find_package<'a>(
    packages: &'a BTreeMap<String, PackageConfig>,
    key: &str,
) -> Option<(&'a str, &'a PackageConfig)> {
    packages
        .iter()
        .filter(|(root, _)| is_inside(root, key))
        .max_by_key(|(root, _)| root.len())
        .map(|(root, pkg)| (root.as_str(), pkg))
}

fn is_inside(root: &str, key: &str) -> bool {
    key.strip_prefix(root)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Path of `key` relative to the package root.
pub(crate) fn sub_path<'a>(root: &str, key: &'a str) -> &'a str {
    key.get(root.len() + 1..).unwrap_or("")
}

/// Resolve `sub_path` inside the package rooted at `root`.
pub(crate) fn apply_package(
    rules: &Rules,
    root: &str,
    pkg: &PackageConfig,
    sub_path: &str,
    skip_extensions: bool,
) -> Result<PackageStep> {
    let sub_path = if sub_path.is_empty() {
        match &pkg.main {
            Some(main) => main.strip_prefix("./").unwrap_or(main).to_string(),
            None => return Ok(PackageStep::Resolved(root.to_string())),
        }
    } else {
        sub_path.to_string()
    };

    if !pkg.map.is_empty() {
        let mut map_path = format!("./{sub_path}");
        let mut map_match = get_map_match(&pkg.map, &map_path);
        if map_match.is_none() {
            let extended = format!(
                "./{}",
                add_default_extension(rules, root, pkg, &sub_path, skip_extensions)
            );
            if extended != map_path {
                map_match = get_map_match(&pkg.map, &extended);
                map_path = extended;
            }
        }
        if let Some(pattern) = map_match {
            let path = map_path.strip_suffix('/').unwrap_or(&map_path);
            let mapped = &pkg.map[pattern];
            if valid_mapping(pattern, mapped, path) {
                return Ok(PackageStep::Remap {
                    specifier: format!("{mapped}{}", &path[pattern.len().min(path.len())..]),
                    parent: format!("{root}/"),
                });
            }
        }
    }

    Ok(PackageStep::Resolved(format!(
        "{root}/{}",
        add_default_extension(rules, root, pkg, &sub_path, skip_extensions)
    )))
}

/// A map of `./x` into its own subtree (`./x` -> `./x/y`) applies to `./x`
/// itself only.
fn valid_mapping(pattern: &str, mapped: &str, path: &str) -> bool {
    !(mapped.starts_with(pattern) && path.len() > pattern.len())
}

/// Append the package's default extension unless the path is a folder, an
/// extension is already present, or metadata pins this exact path.
pub(crate) fn add_default_extension(
    rules: &Rules,
    root: &str,
    pkg: &PackageConfig,
    sub_path: &str,
    skip_extensions: bool,
) -> String {
    let Some(extension) = &pkg.default_extension else {
        return sub_path.to_string();
    };
    if sub_path.is_empty() || sub_path.ends_with('/') || skip_extensions {
        return sub_path.to_string();
    }
    if pins_extension(&pkg.meta, sub_path)
        || pins_extension(&rules.meta, &format!("{root}/{sub_path}"))
    {
        return sub_path.to_string();
    }

    let extension = format!(".{extension}");
    if sub_path.ends_with(&extension) {
        sub_path.to_string()
    } else {
        format!("{sub_path}{extension}")
    }
}

/// Exact meta, or wildcard meta with text after the `*`.
fn pins_extension(meta: &BTreeMap<String, MetaConfig>, path: &str) -> bool {
    meta.keys().any(|pattern| {
        let pattern = pattern.strip_prefix("./").unwrap_or(pattern);
        match pattern.find('*') {
            Some(star) => star + 1 < pattern.len() && wildcard_matches(pattern, path),
            None => pattern == path,
        }
    })
}

/// Match a single-`*` pattern; the `*` may match an empty string.
pub(crate) fn wildcard_matches(pattern: &str, path: &str) -> bool {
    let Some((prefix, suffix)) = pattern.split_once('*') else {
        return pattern == path;
    };
    path.len() >= prefix.len() + suffix.len() && path.starts_with(prefix) && path.ends_with(suffix)
}

/// Meta entries matching `path`, in application order: wildcards from
/// shallowest to deepest, then the exact entry.
pub(crate) fn matching_meta<'a>(
    meta: &'a BTreeMap<String, MetaConfig>,
    path: &str,
) -> Vec<&'a MetaConfig> {
    let mut wildcards: Vec<(usize, &MetaConfig)> = meta
        .iter()
        .filter_map(|(pattern, config)| {
            let bare = pattern.strip_prefix("./").unwrap_or(pattern);
            (bare.contains('*') && wildcard_matches(bare, path))
                .then(|| (bare.split('/').count(), config))
        })
        .collect();
    wildcards.sort_by_key(|(depth, _)| *depth);

    let exact = meta.get(path).or_else(|| meta.get(&format!("./{path}")));
    wildcards
        .into_iter()
        .map(|(_, config)| config)
        .chain(exact)
        .collect()
}

/// A normalized `packageConfigPaths` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConfigPath {
    /// `/`-separated segments of the package root pattern
    segments: Vec<String>,
    /// Appended to a matched root to form the config URL
    suffix: String,
}

impl ConfigPath {
    /// `pattern` is an absolute URL ending in `.json`.
    pub(crate) fn new(pattern: &str) -> Self {
        let (directory, file) = match pattern.rfind('/') {
            Some(slash) => (&pattern[..slash], &pattern[slash..]),
            None => ("", pattern),
        };
        if file.contains('*') {
            // packages/*.json: the file name is the package name
            let root = pattern.strip_suffix(".json").unwrap_or(pattern);
            Self {
                segments: root.split('/').map(String::from).collect(),
                suffix: ".json".to_string(),
            }
        } else {
            Self {
                segments: directory.split('/').map(String::from).collect(),
                suffix: file.to_string(),
            }
        }
    }

    /// Package root and config URL when `key` lies inside a matching package.
    pub(crate) fn matches(&self, key: &str) -> Option<(String, String)> {
        let parts: Vec<&str> = key.split('/').collect();
        if parts.len() < self.segments.len() {
            return None;
        }
        let matched = self.segments.iter().zip(&parts).all(|(pattern, part)| {
            if pattern.contains('*') {
                !part.is_empty() && wildcard_matches(pattern, part)
            } else {
                pattern == part
            }
        });
        if !matched {
            return None;
        }
        let root = parts[..self.segments.len()].join("/");
        let url = format!("{root}{}", self.suffix);
        Some((root, url))
    }
}

/// Read a package configuration out of `package.json` content.
///
/// Unknown or mistyped fields are ignored; a `systemjs` object overrides the
/// top-level fields.
pub(crate) fn package_config_from_json(json: &serde_json::Value) -> PackageConfig {
    let mut config = read_package_fields(json);
    if let Some(overrides) = json.get("systemjs") {
        config.merge(&read_package_fields(overrides));
    }
    config
}

fn read_package_fields(json: &serde_json::Value) -> PackageConfig {
    let text = |name: &str| json.get(name).and_then(|v| v.as_str()).map(String::from);

    PackageConfig {
        main: text("main"),
        format: text("format").and_then(|format| format.parse().ok()),
        default_extension: match json.get("defaultExtension") {
            Some(serde_json::Value::String(ext)) => Some(ext.trim_start_matches('.').to_string()),
            Some(serde_json::Value::Bool(true)) => Some("js".to_string()),
            _ => None,
        },
        map: json
            .get("map")
            .and_then(|map| map.as_object())
            .map(|map| {
                map.iter()
                    .filter_map(|(from, to)| to.as_str().map(|to| (from.clone(), to.to_string())))
                    .collect()
            })
            .unwrap_or_default(),
        meta: json
            .get("meta")
            .and_then(|meta| serde_json::from_value(meta.clone()).ok())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Format, LoaderConfig};

    fn rules_with(pkg: PackageConfig) -> (Rules, PackageConfig) {
        let mut config = LoaderConfig {
            base_url: "http://x.com/".into(),
            ..Default::default()
        };
        config.packages.insert("pkg".into(), pkg.clone());
        (Rules::new(&config).unwrap(), pkg)
    }

    fn js_package() -> PackageConfig {
        PackageConfig {
            default_extension: Some("js".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_extension_and_trailing_slash() {
        let (rules, pkg) = rules_with(js_package());
        let root = "http://x.com/pkg";
        assert_eq!(
            apply_package(&rules, root, &pkg, "sub", false).unwrap(),
            PackageStep::Resolved("http://x.com/pkg/sub.js".into())
        );
        assert_eq!(
            apply_package(&rules, root, &pkg, "sub/", false).unwrap(),
            PackageStep::Resolved("http://x.com/pkg/sub/".into())
        );
        assert_eq!(
            apply_package(&rules, root, &pkg, "sub.js", false).unwrap(),
            PackageStep::Resolved("http://x.com/pkg/sub.js".into())
        );
        assert_eq!(
            apply_package(&rules, root, &pkg, "sub", true).unwrap(),
            PackageStep::Resolved("http://x.com/pkg/sub".into())
        );
    }

    #[test]
    fn test_main_entry() {
        let (rules, pkg) = rules_with(PackageConfig {
            main: Some("./lib/index".into()),
            ..js_package()
        });
        assert_eq!(
            apply_package(&rules, "http://x.com/pkg", &pkg, "", false).unwrap(),
            PackageStep::Resolved("http://x.com/pkg/lib/index.js".into())
        );
    }

    #[test]
    fn test_meta_pins_extension() {
        let mut pkg = js_package();
        pkg.meta.insert("*.css".into(), MetaConfig::default());
        pkg.meta.insert("./data".into(), MetaConfig::default());
        pkg.meta.insert("lib/*".into(), MetaConfig::default());
        let (rules, pkg) = rules_with(pkg);
        let root = "http://x.com/pkg";

        let resolved = |sub: &str| match apply_package(&rules, root, &pkg, sub, false).unwrap() {
            PackageStep::Resolved(key) => key,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(resolved("style.css"), "http://x.com/pkg/style.css");
        assert_eq!(resolved("data"), "http://x.com/pkg/data");
        // Trailing wildcard does not pin the extension
        assert_eq!(resolved("lib/a"), "http://x.com/pkg/lib/a.js");
    }

    #[test]
    fn test_package_map_remaps() {
        let mut pkg = js_package();
        pkg.map.insert("./polyfill".into(), "./polyfill/browser".into());
        pkg.map.insert("./vendor".into(), "other-pkg".into());
        let (rules, pkg) = rules_with(pkg);
        let root = "http://x.com/pkg";

        assert_eq!(
            apply_package(&rules, root, &pkg, "polyfill", false).unwrap(),
            PackageStep::Remap {
                specifier: "./polyfill/browser".into(),
                parent: "http://x.com/pkg/".into(),
            }
        );
        // Recursive self-map only applies to the exact path
        assert_eq!(
            apply_package(&rules, root, &pkg, "polyfill/browser", false).unwrap(),
            PackageStep::Resolved("http://x.com/pkg/polyfill/browser.js".into())
        );
        assert_eq!(
            apply_package(&rules, root, &pkg, "vendor/x", false).unwrap(),
            PackageStep::Remap {
                specifier: "other-pkg/x".into(),
                parent: "http://x.com/pkg/".into(),
            }
        );
    }

    #[test]
    fn test_matching_meta_order() {
        let mut meta = BTreeMap::new();
        meta.insert("http://x.com/lib/*".to_string(), MetaConfig {
            format: Some(Format::Amd),
            ..Default::default()
        });
        meta.insert("*".to_string(), MetaConfig {
            format: Some(Format::Global),
            ..Default::default()
        });
        meta.insert("http://x.com/lib/a.js".to_string(), MetaConfig {
            format: Some(Format::Cjs),
            ..Default::default()
        });

        let formats: Vec<_> = matching_meta(&meta, "http://x.com/lib/a.js")
            .iter()
            .map(|m| m.format)
            .collect();
        assert_eq!(formats, vec![Some(Format::Global), Some(Format::Amd), Some(Format::Cjs)]);
    }

    #[test]
    fn test_config_path_matching() {
        let path = ConfigPath::new("http://x.com/packages/*/package.json");
        assert_eq!(
            path.matches("http://x.com/packages/ui/lib/button.js"),
            Some((
                "http://x.com/packages/ui".to_string(),
                "http://x.com/packages/ui/package.json".to_string()
            ))
        );
        assert_eq!(path.matches("http://x.com/other/ui/a.js"), None);

        let flat = ConfigPath::new("http://x.com/configs/*.json");
        assert_eq!(
            flat.matches("http://x.com/configs/ui/a.js").map(|(_, url)| url),
            Some("http://x.com/configs/ui.json".to_string())
        );
    }

    #[test]
    fn test_package_json_with_overrides() {
        let json = serde_json::json!({
            "name": "ui",
            "main": "index.js",
            "systemjs": { "main": "dist/ui", "defaultExtension": "js", "format": "amd" },
            "map": { "./x": "./y", "bad": 1 }
        });
        let config = package_config_from_json(&json);
        assert_eq!(config.main.as_deref(), Some("dist/ui"));
        assert_eq!(config.default_extension.as_deref(), Some("js"));
        assert_eq!(config.format, Some(Format::Amd));
        assert_eq!(config.map.len(), 1);
    }
}
