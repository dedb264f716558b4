// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Loader configuration.

use crate::error::{LoaderError, Result};
use crate::namespace::Namespace;
use crate::value::Value;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Prefix of environment overrides: `SPACEY_LOADER_BASE_URL` sets `base-url`.
const ENV_PREFIX: &str = "SPACEY_LOADER_";
/// Names the configuration file itself, read by the command line.
const ENV_CONFIG_FILE: &str = "SPACEY_LOADER_CONFIG";

/// Module source format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// ES module syntax, needs a transpiler
    Esm,
    /// `System.register` output
    Register,
    /// Alias of `register`
    System,
    /// `define(...)`
    Amd,
    /// CommonJS
    Cjs,
    /// Script writing to the shared global object
    Global,
    /// WebAssembly binary
    Wasm,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Esm => "esm",
            Format::Register => "register",
            Format::System => "system",
            Format::Amd => "amd",
            Format::Cjs => "cjs",
            Format::Global => "global",
            Format::Wasm => "wasm",
        }
    }

    /// Whether sources of this format call `register` themselves.
    pub fn is_register(&self) -> bool {
        matches!(self, Format::Register | Format::System)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "esm" | "es6" => Ok(Format::Esm),
            "register" => Ok(Format::Register),
            "system" => Ok(Format::System),
            "amd" => Ok(Format::Amd),
            "cjs" | "commonjs" => Ok(Format::Cjs),
            "global" => Ok(Format::Global),
            "wasm" => Ok(Format::Wasm),
            other => Err(LoaderError::UnknownFormat(other.to_string())),
        }
    }
}

/// Configuration for the loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoaderConfig {
    /// Base URL plain specifiers resolve against
    #[serde(rename = "baseURL")]
    pub base_url: String,
    /// Path prefix rewrites, applied after URL and map resolution
    pub paths: BTreeMap<String, String>,
    /// Specifier prefix aliases
    pub map: BTreeMap<String, String>,
    /// Per-package configuration
    pub packages: BTreeMap<String, PackageConfig>,
    /// Per-key metadata; keys may contain one `*` wildcard
    pub meta: BTreeMap<String, MetaConfig>,
    /// Patterns locating `package.json` files to fetch on demand
    pub package_config_paths: Vec<String>,
    /// Known dependencies to preload per module
    pub dep_cache: BTreeMap<String, Vec<String>>,
    /// Bundle key -> modules it registers
    pub bundles: BTreeMap<String, Vec<String>>,
    /// Whether plugin syntax is `plugin!arg` instead of `arg!plugin`
    pub plugin_first: bool,
    /// Plugin module used to translate ES module sources
    pub transpiler: Option<String>,
    /// Flags exposed through `@system-env`
    pub env: SystemEnv,
    /// Record load traces
    pub trace: bool,
    /// Log developer warnings
    pub warnings: bool,
    /// Local cache directory for fetched sources
    pub cache: Option<PathBuf>,
    /// Request timeout in seconds for network transports
    pub timeout: u64,
    /// Custom config values
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            paths: BTreeMap::new(),
            map: BTreeMap::new(),
            packages: BTreeMap::new(),
            meta: BTreeMap::new(),
            package_config_paths: Vec::new(),
            dep_cache: BTreeMap::new(),
            bundles: BTreeMap::new(),
            plugin_first: false,
            transpiler: None,
            env: SystemEnv::default(),
            trace: false,
            warnings: false,
            cache: None,
            timeout: 60,
            extra: BTreeMap::new(),
        }
    }
}

/// Configuration for a single package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PackageConfig {
    /// Entry point relative to the package root
    pub main: Option<String>,
    /// Format of every module in the package
    pub format: Option<Format>,
    /// Extension appended to extensionless subpaths; `false` disables it
    #[serde(deserialize_with = "extension_or_false")]
    pub default_extension: Option<String>,
    /// Package-relative aliases (`./sub` or plain names)
    pub map: BTreeMap<String, String>,
    /// Package-relative metadata
    pub meta: BTreeMap<String, MetaConfig>,
}

impl PackageConfig {
    /// Overlay `other` on top of this config; `other` wins on conflicts.
    pub fn merge(&mut self, other: &PackageConfig) {
        if other.main.is_some() {
            self.main = other.main.clone();
        }
        if other.format.is_some() {
            self.format = other.format;
        }
        if other.default_extension.is_some() {
            self.default_extension = other.default_extension.clone();
        }
        self.map
            .extend(other.map.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.meta
            .extend(other.meta.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// Metadata configured for a key or key pattern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MetaConfig {
    pub format: Option<Format>,
    /// Plugin specifier that loads this module
    pub loader: Option<String>,
    /// Extra dependencies
    pub deps: Vec<String>,
    /// Global path a global script exports
    pub exports: Option<String>,
    /// Globals to inject: name -> dependency specifier
    pub globals: BTreeMap<String, String>,
    /// Subresource integrity of the payload
    pub integrity: Option<String>,
    /// Authorization passed to the transport
    pub authorization: Option<String>,
    /// Lift `__esModule` exports
    pub es_module: Option<bool>,
    /// Scan CommonJS sources for `require` calls
    pub cjs_require_detection: Option<bool>,
    /// Run every dependency before the module body
    pub eager_require: Option<bool>,
    /// The module is a bundle of named registrations
    pub bundle: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Environment flags published as `@system-env`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemEnv {
    pub browser: bool,
    pub node: bool,
    pub production: bool,
    pub build: bool,
}

impl SystemEnv {
    /// Names readable as bare conditions.
    pub const FLAGS: [&'static str; 6] =
        ["browser", "node", "dev", "build", "production", "default"];

    pub fn namespace(&self) -> Namespace {
        Namespace::from_exports([
            ("browser", Value::from(self.browser)),
            ("node", Value::from(self.node)),
            ("dev", Value::from(!self.production)),
            ("build", Value::from(self.build)),
            ("production", Value::from(self.production)),
            ("default", Value::from(true)),
        ])
    }
}

fn extension_or_false<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Extension {
        Flag(bool),
        Name(String),
    }

    match Option::<Extension>::deserialize(deserializer)? {
        Some(Extension::Name(name)) => Ok(Some(name)),
        Some(Extension::Flag(true)) => Ok(Some("js".to_string())),
        Some(Extension::Flag(false)) | None => Ok(None),
    }
}

impl LoaderConfig {
    /// Load configuration from a JSON file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LoaderError::validation(format!("Unable to read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_json(&content)?;
        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from JSON text.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: LoaderConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SPACEY_LOADER_*` environment variables.
    pub fn load_from_env(&mut self) {
        self.apply_env(std::env::vars());
    }

    fn apply_env(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            if key == ENV_CONFIG_FILE {
                continue;
            }
            if let Some(config_key) = key.strip_prefix(ENV_PREFIX) {
                let config_key = config_key.to_lowercase().replace('_', "-");
                self.set(&config_key, &value);
            }
        }
    }

    /// Set a configuration value by its command-line name.
    pub fn set(&mut self, key: &str, value: &str) {
        match key {
            "base-url" => self.base_url = value.to_string(),
            "trace" => self.trace = is_truthy(value),
            "warnings" => self.warnings = is_truthy(value),
            "plugin-first" => self.plugin_first = is_truthy(value),
            "transpiler" => self.transpiler = Some(value.to_string()),
            "cache" => self.cache = Some(PathBuf::from(value)),
            "timeout" => {
                if let Ok(n) = value.parse() {
                    self.timeout = n;
                }
            }
            "production" => self.env.production = is_truthy(value),
            "browser" => self.env.browser = is_truthy(value),
            "node" => self.env.node = is_truthy(value),
            "build" => self.env.build = is_truthy(value),
            _ => {
                self.extra
                    .insert(key.to_string(), serde_json::Value::String(value.to_string()));
            }
        }
    }

    /// Get a configuration value by its command-line name.
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "base-url" => Some(self.base_url.clone()),
            "trace" => Some(self.trace.to_string()),
            "warnings" => Some(self.warnings.to_string()),
            "plugin-first" => Some(self.plugin_first.to_string()),
            "transpiler" => self.transpiler.clone(),
            "cache" => self.cache.as_ref().map(|p| p.display().to_string()),
            "timeout" => Some(self.timeout.to_string()),
            _ => self.extra.get(key).and_then(|v| v.as_str().map(String::from)),
        }
    }

    /// Reject configurations the resolver cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !self.base_url.contains(':') {
            return Err(LoaderError::validation(format!(
                "baseURL \"{}\" must be an absolute URL",
                self.base_url
            )));
        }
        for (name, pkg) in &self.packages {
            if let Some(ext) = &pkg.default_extension {
                if ext.starts_with('.') {
                    return Err(LoaderError::validation(format!(
                        "defaultExtension of package \"{name}\" must not start with a dot"
                    )));
                }
            }
        }
        for pattern in self.meta.keys().chain(
            self.packages
                .values()
                .flat_map(|pkg| pkg.meta.keys()),
        ) {
            if pattern.matches('*').count() > 1 {
                return Err(LoaderError::validation(format!(
                    "meta pattern \"{pattern}\" may contain at most one wildcard"
                )));
            }
        }
        for path in &self.package_config_paths {
            if !path.ends_with(".json") {
                return Err(LoaderError::validation(format!(
                    "packageConfigPaths entry \"{path}\" must name a .json file"
                )));
            }
        }
        if matches!(&self.transpiler, Some(t) if t.is_empty()) {
            return Err(LoaderError::validation("transpiler must not be empty"));
        }
        Ok(())
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "yes" | "on")
}

/// Base URL of the current working directory as a `file:` URL.
pub fn default_base_url() -> String {
    std::env::current_dir()
        .ok()
        .and_then(|dir| url::Url::from_directory_path(dir).ok())
        .map(String::from)
        .unwrap_or_else(|| "file:///".to_string())
}

/// Default local cache directory for fetched sources.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("spacey-loader")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoaderConfig::default();
        assert!(config.base_url.ends_with('/'));
        assert!(!config.trace);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_camel_case() {
        let config = LoaderConfig::from_json(
            r#"{
                "baseURL": "http://example.com/app/",
                "packages": { "pkg": { "main": "index", "defaultExtension": "js" } },
                "depCache": { "a.js": ["b.js"] },
                "pluginFirst": true,
                "meta": { "*.css": { "loader": "css" } }
            }"#,
        )
        .unwrap();

        assert_eq!(config.base_url, "http://example.com/app/");
        assert_eq!(config.packages["pkg"].default_extension.as_deref(), Some("js"));
        assert_eq!(config.dep_cache["a.js"], vec!["b.js".to_string()]);
        assert!(config.plugin_first);
        assert_eq!(config.meta["*.css"].loader.as_deref(), Some("css"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = LoaderConfig::default();
        config.apply_env([
            ("SPACEY_LOADER_BASE_URL".to_string(), "http://env.test/".to_string()),
            ("SPACEY_LOADER_TRACE".to_string(), "1".to_string()),
            ("SPACEY_LOADER_WARNINGS".to_string(), "true".to_string()),
            ("SPACEY_LOADER_CONFIG".to_string(), "/etc/loader.json".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ]);

        assert_eq!(config.base_url, "http://env.test/");
        assert!(config.trace);
        assert!(config.warnings);
        assert!(!config.extra.contains_key("config"));
        assert!(config.extra.is_empty());
    }

    #[test]
    fn test_default_extension_false() {
        let config = LoaderConfig::from_json(
            r#"{ "baseURL": "http://x/", "packages": { "p": { "defaultExtension": false } } }"#,
        )
        .unwrap();
        assert_eq!(config.packages["p"].default_extension, None);
    }

    #[test]
    fn test_non_list_is_validation_error() {
        let err = LoaderConfig::from_json(r#"{ "baseURL": "http://x/", "depCache": { "a": "b" } }"#)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);

        let err = LoaderConfig::from_json(r#"{ "baseURL": "http://x/", "bundles": { "b": 1 } }"#)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn test_relative_base_url_rejected() {
        let err = LoaderConfig::from_json(r#"{ "baseURL": "app/" }"#).unwrap_err();
        assert!(err.to_string().contains("absolute URL"));
    }

    #[test]
    fn test_set_and_get() {
        let mut config = LoaderConfig::default();
        config.set("base-url", "http://cdn/");
        config.set("trace", "1");
        config.set("custom", "value");

        assert_eq!(config.get("base-url").as_deref(), Some("http://cdn/"));
        assert!(config.trace);
        assert_eq!(config.get("custom").as_deref(), Some("value"));
    }

    #[test]
    fn test_format_names() {
        assert_eq!("commonjs".parse::<Format>().unwrap(), Format::Cjs);
        assert!(Format::System.is_register());
        assert!(matches!("coffee".parse::<Format>(), Err(LoaderError::UnknownFormat(_))));
    }

    #[test]
    fn test_package_merge_explicit_wins() {
        let mut fetched = PackageConfig {
            main: Some("dist/index.js".into()),
            default_extension: Some("js".into()),
            ..Default::default()
        };
        let explicit = PackageConfig {
            main: Some("lib/main".into()),
            ..Default::default()
        };
        fetched.merge(&explicit);
        assert_eq!(fetched.main.as_deref(), Some("lib/main"));
        assert_eq!(fetched.default_extension.as_deref(), Some("js"));
    }
}
