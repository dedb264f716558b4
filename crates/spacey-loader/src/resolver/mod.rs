// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Specifier resolution.
//!
//! Resolution runs in this order:
//!
//! 1. keys already registered or loading, and `@node/` keys, pass through
//! 2. a boolean `#?condition` suffix selects the specifier or `@empty`
//! 3. plugin syntax splits into argument and plugin, resolved separately
//! 4. URL join / `map` / `paths`, then package main, map and extension
//! 5. `#{condition}` interpolation
//!
//! The resolved key's metadata is computed and cached along the way.

mod conditions;
mod package;
mod url;

pub use url::{apply_paths, get_map_match, is_plain, resolve_if_not_plain};

pub(crate) use package::{ConfigPath, PackageStep};

use crate::config::{LoaderConfig, MetaConfig, PackageConfig};
use crate::error::{LoaderError, Result};
use crate::key::{HOST_BUILTIN_PREFIX, ModuleKey};
use crate::loader::Loader;
use crate::metadata::Metadata;
use crate::registry::EMPTY_MODULE;
use crate::transport::FetchRequest;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Bound on package map hops for one specifier.
const MAX_PACKAGE_REDIRECTS: usize = 32;

/// Configuration with every key normalized to a URL.
#[derive(Debug, Clone)]
pub(crate) struct Rules {
    pub base_url: String,
    pub paths: BTreeMap<String, String>,
    pub map: BTreeMap<String, String>,
    /// Package root URL (no trailing `/`) -> config
    pub packages: BTreeMap<String, PackageConfig>,
    pub meta: BTreeMap<String, MetaConfig>,
    pub config_paths: Vec<ConfigPath>,
    /// Module key -> dependency specifiers to preload
    pub dep_cache: BTreeMap<String, Vec<String>>,
    /// Bundle key -> module keys it registers
    pub bundles: BTreeMap<String, Vec<String>>,
    pub plugin_first: bool,
}

impl Rules {
    pub(crate) fn new(config: &LoaderConfig) -> Result<Self> {
        let mut base_url = config.base_url.clone();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        let mut rules = Rules {
            base_url,
            paths: config.paths.clone(),
            map: config.map.clone(),
            packages: BTreeMap::new(),
            meta: BTreeMap::new(),
            config_paths: Vec::new(),
            dep_cache: BTreeMap::new(),
            bundles: BTreeMap::new(),
            plugin_first: config.plugin_first,
        };

        for (name, pkg) in &config.packages {
            let root = url::core_resolve(&rules, name, None, true)?;
            rules.packages.insert(root, pkg.clone());
        }
        for (pattern, meta) in &config.meta {
            let key = if pattern.starts_with('*') {
                pattern.clone()
            } else {
                url::core_resolve(&rules, pattern, None, false)?
            };
            rules.meta.insert(key, meta.clone());
        }
        for pattern in &config.package_config_paths {
            let normalized = url::core_resolve(&rules, pattern, None, false)?;
            rules.config_paths.push(ConfigPath::new(&normalized));
        }
        for (key, deps) in &config.dep_cache {
            let key = rules.resolve_sync(key, None)?;
            rules.dep_cache.insert(key, deps.clone());
        }
        for (bundle, members) in &config.bundles {
            let bundle = rules.resolve_sync(bundle, None)?;
            let members = members
                .iter()
                .map(|member| rules.resolve_sync(member, None))
                .collect::<Result<Vec<_>>>()?;
            rules.bundles.insert(bundle, members);
        }
        Ok(rules)
    }

    /// Map, URL join and paths only. Never fetches.
    pub(crate) fn resolve_sync(&self, specifier: &str, parent: Option<&str>) -> Result<String> {
        if specifier.starts_with(HOST_BUILTIN_PREFIX)
            || specifier.starts_with('@') && !specifier.contains('/')
        {
            return Ok(specifier.to_string());
        }
        url::core_resolve(self, specifier, parent, false)
    }

    /// Explicitly configured package containing `key`.
    pub(crate) fn package_for(&self, key: &str) -> Option<(&str, &PackageConfig)> {
        package::find_package(&self.packages, key)
    }

    /// Bundle that registers `key`.
    pub(crate) fn bundle_for(&self, key: &str) -> Option<&str> {
        self.bundles
            .iter()
            .find(|(_, members)| members.iter().any(|member| member == key))
            .map(|(bundle, _)| bundle.as_str())
    }

    pub(crate) fn is_bundle(&self, key: &str) -> bool {
        self.bundles.contains_key(key)
    }
}

fn parse_plugin(plugin_first: bool, specifier: &str) -> Option<(String, String)> {
    if plugin_first {
        let bang = specifier.find('!')?;
        return Some((specifier[bang + 1..].to_string(), specifier[..bang].to_string()));
    }
    let bang = specifier.rfind('!')?;
    let argument = &specifier[..bang];
    let plugin = match &specifier[bang + 1..] {
        "" => match argument.rfind('.') {
            Some(dot) => &argument[dot + 1..],
            None => argument,
        },
        plugin => plugin,
    };
    Some((argument.to_string(), plugin.to_string()))
}

fn combine_plugin(plugin_first: bool, argument: &str, plugin: &str) -> String {
    if plugin_first {
        format!("{plugin}!{argument}")
    } else {
        format!("{argument}!{plugin}")
    }
}

impl Loader {
    /// Resolve without stage wrapping. Boxed so resolution can recurse
    /// through condition imports and plugin parts.
    pub(crate) fn resolve_key(
        &self,
        specifier: String,
        parent: Option<String>,
        skip_extensions: bool,
    ) -> BoxFuture<'static, Result<String>> {
        let loader = self.clone();
        async move {
            loader
                .resolve_uncached(&specifier, parent.as_deref(), skip_extensions)
                .await
        }
        .boxed()
    }

    async fn resolve_uncached(
        &self,
        specifier: &str,
        parent: Option<&str>,
        skip_extensions: bool,
    ) -> Result<String> {
        let inner = &self.inner;
        if inner.registry.has(specifier)
            || inner.records.has(specifier)
            || specifier.starts_with(HOST_BUILTIN_PREFIX)
        {
            return Ok(specifier.to_string());
        }

        if let Some((rest, condition)) = conditions::split_boolean(specifier) {
            let chosen = conditions::resolve_boolean(self, rest, condition, parent).await?;
            if chosen == EMPTY_MODULE {
                return Ok(chosen);
            }
            return self
                .resolve_key(chosen, parent.map(str::to_string), skip_extensions)
                .await;
        }

        if let Some((argument, plugin)) = parse_plugin(inner.rules.plugin_first, specifier) {
            return self.resolve_plugin(argument, plugin, parent).await;
        }

        let (key, package) = self.package_resolve(specifier, parent, skip_extensions).await?;
        let key = if conditions::find_interpolation(&key).is_some() {
            conditions::interpolate(self, key, parent).await?
        } else {
            key
        };

        if !inner.metadata.contains_key(key.as_str()) {
            let package = package.as_ref().map(|(root, pkg)| (root.as_str(), pkg));
            let metadata = self.compute_metadata(&key, package);
            inner.metadata.insert(ModuleKey::from(key.as_str()), metadata);
        }
        trace!(specifier, parent, key = %key, "resolved");
        Ok(key)
    }

    async fn resolve_plugin(
        &self,
        argument: String,
        plugin: String,
        parent: Option<&str>,
    ) -> Result<String> {
        let parent = parent.map(str::to_string);
        let (argument_key, plugin_key) = futures::try_join!(
            self.resolve_key(argument, parent.clone(), true),
            self.resolve_key(plugin, parent, false),
        )?;
        if argument_key == plugin_key {
            return Err(LoaderError::resolution(format!(
                "Plugin {plugin_key} cannot resolve to itself"
            )));
        }

        let rules = &self.inner.rules;
        let plugin_has_extension = rules
            .package_for(&plugin_key)
            .is_some_and(|(_, pkg)| pkg.default_extension.is_some());
        let shown_argument = match argument_key.strip_suffix(".js") {
            Some(stripped) if plugin_has_extension => stripped,
            _ => argument_key.as_str(),
        };
        let key = combine_plugin(rules.plugin_first, shown_argument, &plugin_key);

        let mut metadata = self.metadata(&ModuleKey::from(argument_key.as_str()));
        metadata.loader = Some(plugin_key);
        metadata.plugin_argument = Some(argument_key);
        self.inner.metadata.insert(ModuleKey::from(key.as_str()), metadata);
        Ok(key)
    }

    /// URL/map/paths resolution followed by package configuration.
    async fn package_resolve(
        &self,
        specifier: &str,
        parent: Option<&str>,
        skip_extensions: bool,
    ) -> Result<(String, Option<(String, PackageConfig)>)> {
        let rules = &self.inner.rules;
        let mut specifier = specifier.to_string();
        let mut parent = parent.map(str::to_string);

        for _ in 0..MAX_PACKAGE_REDIRECTS {
            // Plain specifiers first consult the map of the parent's package
            if let Some(parent_key) = parent.as_deref().filter(|_| is_plain(&specifier)) {
                if let Some((root, pkg)) = self.known_package(parent_key) {
                    if let Some(pattern) = get_map_match(&pkg.map, &specifier) {
                        let mapped = format!("{}{}", pkg.map[pattern], &specifier[pattern.len()..]);
                        if mapped != specifier {
                            trace!(
                                specifier = %specifier,
                                mapped = %mapped,
                                package = %root,
                                "package map"
                            );
                            specifier = mapped;
                            parent = Some(format!("{root}/"));
                        }
                    }
                }
            }

            let normalized = url::core_resolve(rules, &specifier, parent.as_deref(), false)?;
            let Some((root, pkg)) = self.package_config(&normalized).await? else {
                return Ok((normalized, None));
            };
            let sub_path = package::sub_path(&root, &normalized);
            match package::apply_package(rules, &root, &pkg, sub_path, skip_extensions)? {
                PackageStep::Resolved(key) => return Ok((key, Some((root, pkg)))),
                PackageStep::Remap {
                    specifier: next,
                    parent: next_parent,
                } => {
                    specifier = next;
                    parent = Some(next_parent);
                }
            }
        }

        Err(LoaderError::resolution(format!(
            "Too many package map redirects resolving {specifier}"
        )))
    }

    /// The package containing `key`, fetching its `package.json` when a
    /// `packageConfigPaths` entry covers it and it is not configured.
    async fn package_config(&self, key: &str) -> Result<Option<(String, PackageConfig)>> {
        let rules = &self.inner.rules;
        let explicit = rules.package_for(key);
        let from_path = rules
            .config_paths
            .iter()
            .filter_map(|path| path.matches(key))
            .max_by_key(|(root, _)| root.len());

        if let Some((root, url)) = from_path {
            let covered =
                explicit.is_some_and(|(explicit_root, _)| explicit_root.len() >= root.len());
            if !covered {
                let config = self.fetch_package_config(root.clone(), url).await?;
                return Ok(Some((root, config)));
            }
        }
        Ok(explicit.map(|(root, pkg)| (root.to_string(), pkg.clone())))
    }

    async fn fetch_package_config(&self, root: String, url: String) -> Result<PackageConfig> {
        let shared = self
            .inner
            .package_configs
            .entry(root.clone())
            .or_insert_with(|| {
                let transport = self.inner.transport.clone();
                async move {
                    debug!(package = %root, url = %url, "fetching package config");
                    let payload = transport
                        .fetch(&FetchRequest::new(url.clone()))
                        .await
                        .map_err(|err| {
                            LoaderError::resolution(format!(
                                "Unable to load package config {url}: {err}"
                            ))
                        })?;
                    let json: serde_json::Value = serde_json::from_str(&payload.into_text())
                        .map_err(|err| {
                            LoaderError::resolution(format!(
                                "Invalid package config {url}: {err}"
                            ))
                        })?;
                    Ok(package::package_config_from_json(&json))
                }
                .boxed()
                .shared()
            })
            .clone();
        shared.await
    }

    /// Explicit or already fetched package containing `key`.
    fn known_package(&self, key: &str) -> Option<(String, PackageConfig)> {
        let fetched = self
            .inner
            .package_configs
            .iter()
            .filter(|entry| {
                key.strip_prefix(entry.key().as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
            })
            .filter_map(|entry| match entry.value().peek() {
                Some(Ok(config)) => Some((entry.key().clone(), config.clone())),
                _ => None,
            })
            .max_by_key(|(root, _)| root.len());

        match (self.inner.rules.package_for(key), fetched) {
            (Some((root, pkg)), Some(fetched)) if root.len() >= fetched.0.len() => {
                Some((root.to_string(), pkg.clone()))
            }
            (_, Some(fetched)) => Some(fetched),
            (Some((root, pkg)), None) => Some((root.to_string(), pkg.clone())),
            (None, None) => None,
        }
    }

    /// Effective metadata of a key, computed from configuration when it was
    /// never resolved through [`Loader::resolve`].
    pub(crate) fn metadata(&self, key: &ModuleKey) -> Metadata {
        if let Some(metadata) = self.inner.metadata.get(key.as_str()) {
            return metadata.clone();
        }
        let package = self.known_package(key);
        self.compute_metadata(key, package.as_ref().map(|(root, pkg)| (root.as_str(), pkg)))
    }

    /// Global wildcard meta, global exact meta, package format, package
    /// wildcard meta, package exact meta; later entries win.
    fn compute_metadata(&self, key: &str, package: Option<(&str, &PackageConfig)>) -> Metadata {
        let mut metadata = Metadata::default();
        for meta in package::matching_meta(&self.inner.rules.meta, key) {
            metadata.apply(meta);
        }
        if let Some((root, pkg)) = package {
            metadata.package = Some(root.to_string());
            if pkg.format.is_some() {
                metadata.format = pkg.format;
            }
            for meta in package::matching_meta(&pkg.meta, package::sub_path(root, key)) {
                metadata.apply(meta);
            }
        }
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Format;

    fn config() -> LoaderConfig {
        LoaderConfig::from_json(
            r#"{
                "baseURL": "http://x.com/app",
                "map": { "jquery": "lib/jquery.js", "cdn": "https://cdn.com/pkgs" },
                "packages": { "pkg": { "defaultExtension": "js" } },
                "meta": { "*.css": { "loader": "css" }, "vendor/*": { "format": "global" } },
                "bundles": { "bundle.js": ["a.js", "b"] },
                "depCache": { "./main.js": ["./dep.js"] }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_rules_normalize_keys() {
        let rules = Rules::new(&config()).unwrap();
        assert_eq!(rules.base_url, "http://x.com/app/");
        assert!(rules.packages.contains_key("http://x.com/app/pkg"));
        assert!(rules.meta.contains_key("*.css"));
        assert!(rules.meta.contains_key("http://x.com/app/vendor/*"));
        assert_eq!(
            rules.bundles["http://x.com/app/bundle.js"],
            vec!["http://x.com/app/a.js".to_string(), "http://x.com/app/b".to_string()]
        );
        assert!(rules.dep_cache.contains_key("http://x.com/app/main.js"));
        assert_eq!(rules.bundle_for("http://x.com/app/b"), Some("http://x.com/app/bundle.js"));
        assert!(rules.is_bundle("http://x.com/app/bundle.js"));
    }

    #[test]
    fn test_resolve_sync_applies_map() {
        let rules = Rules::new(&config()).unwrap();
        assert_eq!(rules.resolve_sync("jquery", None).unwrap(), "http://x.com/app/lib/jquery.js");
        assert_eq!(rules.resolve_sync("cdn/react", None).unwrap(), "https://cdn.com/pkgs/react");
        assert_eq!(
            rules.resolve_sync("./x.js", Some("http://x.com/app/sub/a.js")).unwrap(),
            "http://x.com/app/sub/x.js"
        );
        assert_eq!(rules.resolve_sync("@node/fs", None).unwrap(), "@node/fs");
        assert_eq!(rules.resolve_sync("@empty", None).unwrap(), "@empty");
    }

    #[test]
    fn test_parse_plugin_syntax() {
        assert_eq!(
            parse_plugin(false, "./style.css!css"),
            Some(("./style.css".to_string(), "css".to_string()))
        );
        assert_eq!(
            parse_plugin(false, "./style.css!"),
            Some(("./style.css".to_string(), "css".to_string()))
        );
        assert_eq!(
            parse_plugin(true, "text!./a.txt"),
            Some(("./a.txt".to_string(), "text".to_string()))
        );
        assert_eq!(parse_plugin(false, "./plain.js"), None);
        assert_eq!(combine_plugin(true, "a", "p"), "p!a");
    }

    #[test]
    fn test_meta_format_wildcard() {
        let rules = Rules::new(&config()).unwrap();
        let matched = package::matching_meta(&rules.meta, "http://x.com/app/vendor/lib.js");
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].format, Some(Format::Global));
    }
}
