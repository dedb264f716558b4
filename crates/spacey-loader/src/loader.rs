// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The loader engine.
//!
//! [`Loader`] composes the resolver, the instantiation pipeline, the linker
//! and the evaluator over shared state. It is cheap to clone; every clone
//! drives the same registry.

use crate::config::LoaderConfig;
use crate::error::{LoaderError, Result, Stage};
use crate::evaluator::{CommonJsModule, Evaluator, Require};
use crate::key::ModuleKey;
use crate::linker;
use crate::metadata::Metadata;
use crate::namespace::Namespace;
use crate::pipeline;
use crate::record::{
    Declaration, Exporter, Instantiation, LoadState, RecordStore, Registration, SharedResult,
};
use crate::registry::{EMPTY_MODULE, Registry, SYSTEM_ENV_MODULE};
use crate::resolver::Rules;
use crate::script::{RegisterContext, ScriptEvaluator, WasmRuntime};
use crate::trace::LoadTrace;
use crate::transport::{CachingTransport, SchemeTransport, Transport};
use crate::value::{Object, Value};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::ReentrantMutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument};

/// Turns specifiers into module keys.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, specifier: &str, parent: Option<&str>) -> Result<ModuleKey>;
}

/// Accepts module registrations.
pub trait Register: Send + Sync {
    fn register(&self, key: &str, registration: Registration) -> Result<ModuleKey>;
}

/// Produces module instances.
#[async_trait]
pub trait Instantiate: Send + Sync {
    async fn instantiate(&self, key: &ModuleKey, parent: Option<&str>) -> Result<Instantiation>;
}

/// Shared engine state.
pub(crate) struct LoaderInner {
    /// Configuration as given
    pub(crate) config: LoaderConfig,
    /// Configuration with keys normalized
    pub(crate) rules: Rules,
    /// Evaluated modules
    pub(crate) registry: Registry,
    /// In-flight and failed loads
    pub(crate) records: Arc<RecordStore>,
    /// Metadata computed during resolution
    pub(crate) metadata: DashMap<ModuleKey, Metadata>,
    /// Fetched `package.json` configurations by package root
    pub(crate) package_configs: DashMap<String, SharedResult<crate::config::PackageConfig>>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) scripts: Arc<dyn ScriptEvaluator>,
    pub(crate) wasm: Option<Arc<dyn WasmRuntime>>,
    /// Shared global object of global scripts
    pub(crate) globals: Object,
    pub(crate) traces: DashMap<ModuleKey, LoadTrace>,
    /// Serializes evaluation
    pub(crate) eval_lock: ReentrantMutex<()>,
}

/// The module loader.
#[derive(Clone)]
pub struct Loader {
    pub(crate) inner: Arc<LoaderInner>,
}

impl Loader {
    /// Start configuring a loader
    pub fn builder() -> LoaderBuilder {
        LoaderBuilder::default()
    }

    /// Loader with the given configuration and the standard transports.
    pub fn new(config: LoaderConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Resolve `specifier` against `parent` (or `baseURL`).
    #[instrument(skip(self), level = "debug")]
    pub async fn resolve(&self, specifier: &str, parent: Option<&str>) -> Result<ModuleKey> {
        self.resolve_key(specifier.to_string(), parent.map(str::to_string), false)
            .await
            .map(ModuleKey::from)
            .map_err(|err| err.with_stage(Stage::Resolving, specifier, parent))
    }

    /// Import a module, returning what `import()` yields: a dynamic module's
    /// exports, otherwise its namespace.
    pub async fn import(&self, specifier: &str, parent: Option<&str>) -> Result<Value> {
        let namespace = self.import_namespace(specifier, parent).await?;
        Ok(namespace.unwrap_default())
    }

    /// Import a module, returning its namespace.
    #[instrument(skip(self))]
    pub async fn import_namespace(
        &self,
        specifier: &str,
        parent: Option<&str>,
    ) -> Result<Namespace> {
        self.import_owned(specifier.to_string(), parent.map(str::to_string))
            .await
    }

    pub(crate) fn import_owned(
        &self,
        specifier: String,
        parent: Option<String>,
    ) -> BoxFuture<'static, Result<Namespace>> {
        let loader = self.clone();
        async move {
            let key = loader.resolve(&specifier, parent.as_deref()).await?;
            match loader.instantiate(&key, parent.as_deref()).await? {
                Instantiation::Namespace(namespace) => Ok(namespace),
                Instantiation::Record(record) => {
                    linker::deep_instantiate(&loader, record.clone()).await?;
                    Evaluator::ensure_evaluated(&loader, &record)
                }
            }
        }
        .boxed()
    }

    /// Instantiate the whole graph of `specifier` without evaluating it.
    pub async fn load(&self, specifier: &str, parent: Option<&str>) -> Result<ModuleKey> {
        let key = self.resolve(specifier, parent).await?;
        if let Instantiation::Record(record) = self.instantiate(&key, parent).await? {
            linker::deep_instantiate(self, record).await?;
        }
        Ok(key)
    }

    /// Instantiate a single key: fetch, translate and register it, once.
    pub async fn instantiate(
        &self,
        key: &ModuleKey,
        parent: Option<&str>,
    ) -> Result<Instantiation> {
        let inner = &self.inner;
        if let Some(namespace) = inner.registry.get(key) {
            return Ok(Instantiation::Namespace(namespace));
        }
        if key.is_host_builtin() {
            return Err(LoaderError::load(format!("Host module {key} is not available"))
                .with_stage(Stage::Instantiating, key, parent));
        }

        let record = inner.records.get_or_create(key);
        let link = match record.state() {
            LoadState::Evaluated(namespace) => return Ok(Instantiation::Namespace(namespace)),
            LoadState::LoadFailed(err) | LoadState::EvalFailed(err) => return Err(err),
            LoadState::Linking(link) => link,
        };

        let loader = self.clone();
        let pending = record.clone();
        link.memoize_instantiate(move || {
            pipeline::run_instantiate(loader, pending).boxed().shared()
        })
        .await
    }

    /// Resolve a dependency of `parent` and instantiate it.
    pub(crate) fn resolve_instantiate(
        &self,
        specifier: String,
        parent: ModuleKey,
    ) -> BoxFuture<'static, Result<(ModuleKey, Instantiation)>> {
        let loader = self.clone();
        async move {
            let key = loader.resolve(&specifier, Some(parent.as_str())).await?;
            let instantiation = loader.instantiate(&key, Some(parent.as_str())).await?;
            Ok((key, instantiation))
        }
        .boxed()
    }

    /// `System.register(key, deps, declare)`
    pub fn register(
        &self,
        key: &str,
        deps: Vec<String>,
        declare: impl FnOnce(Exporter, ModuleContext) -> anyhow::Result<Declaration>
            + Send
            + 'static,
    ) -> Result<ModuleKey> {
        self.register_module(key, Registration::declarative(deps, declare))
    }

    /// `System.registerDynamic(key, deps, executingRequire, execute)`
    pub fn register_dynamic(
        &self,
        key: &str,
        deps: Vec<String>,
        executing_require: bool,
        execute: impl FnOnce(&Require<'_>, &CommonJsModule) -> anyhow::Result<()> + Send + 'static,
    ) -> Result<ModuleKey> {
        self.register_module(key, Registration::dynamic(deps, executing_require, execute))
    }

    fn register_module(&self, name: &str, registration: Registration) -> Result<ModuleKey> {
        let key = ModuleKey::from(
            self.inner
                .rules
                .resolve_sync(name, None)
                .map_err(|err| err.with_stage(Stage::Resolving, name, None))?,
        );
        self.accept_registration(&key, registration);
        Ok(key)
    }

    /// Hand a registration to the record of `key`. Ignored for keys that
    /// are already loaded or linking.
    pub(crate) fn accept_registration(&self, key: &ModuleKey, registration: Registration) -> bool {
        if self.inner.registry.has(key) {
            debug!(key = %key, "ignoring registration of a loaded module");
            return false;
        }
        let accepted = self.inner.records.get_or_create(key).set_registration(registration);
        if !accepted {
            debug!(key = %key, "ignoring registration of a linked module");
        }
        accepted
    }

    /// Module registry
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Forget a module and any cached failure for it.
    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.metadata.remove(key);
        self.inner.traces.remove(key);
        let removed = self.inner.registry.delete(key);
        if removed {
            info!(key, "invalidated");
        }
        removed
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    /// Load traces, when `trace` is enabled.
    pub fn traces(&self) -> Vec<LoadTrace> {
        let mut traces: Vec<LoadTrace> = self
            .inner
            .traces
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        traces.sort_by(|a, b| a.key.cmp(&b.key));
        traces
    }

    pub fn trace(&self, key: &str) -> Option<LoadTrace> {
        self.inner.traces.get(key).map(|entry| entry.clone())
    }

    /// The object global scripts read and write.
    pub fn global_object(&self) -> &Object {
        &self.inner.globals
    }

    /// Metadata the pipeline would use for `key`.
    pub fn metadata_for(&self, key: &ModuleKey) -> Metadata {
        self.metadata(key)
    }

    pub(crate) fn context(&self, key: &ModuleKey) -> ModuleContext {
        ModuleContext {
            id: key.clone(),
            loader: Arc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("base_url", &self.inner.rules.base_url)
            .field("registry", &self.inner.registry.len())
            .field("records", &self.inner.records.len())
            .finish()
    }
}

#[async_trait]
impl Resolve for Loader {
    async fn resolve(&self, specifier: &str, parent: Option<&str>) -> Result<ModuleKey> {
        Loader::resolve(self, specifier, parent).await
    }
}

impl Register for Loader {
    fn register(&self, key: &str, registration: Registration) -> Result<ModuleKey> {
        self.register_module(key, registration)
    }
}

#[async_trait]
impl Instantiate for Loader {
    async fn instantiate(&self, key: &ModuleKey, parent: Option<&str>) -> Result<Instantiation> {
        Loader::instantiate(self, key, parent).await
    }
}

/// Handle given to a module's declare function.
#[derive(Clone)]
pub struct ModuleContext {
    id: ModuleKey,
    loader: Weak<LoaderInner>,
}

impl ModuleContext {
    /// Key of the module
    pub fn id(&self) -> &ModuleKey {
        &self.id
    }

    /// Dynamic `import()` relative to this module.
    pub async fn import(&self, specifier: &str) -> Result<Value> {
        self.loader()?.import(specifier, Some(self.id.as_str())).await
    }

    /// Resolve a specifier relative to this module.
    pub async fn resolve(&self, specifier: &str) -> Result<ModuleKey> {
        self.loader()?.resolve(specifier, Some(self.id.as_str())).await
    }

    fn loader(&self) -> Result<Loader> {
        self.loader
            .upgrade()
            .map(|inner| Loader { inner })
            .ok_or_else(|| LoaderError::load(format!("The loader of {} was dropped", self.id)))
    }
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext").field("id", &self.id).finish()
    }
}

/// Evaluator used when none is configured: only modules registered through
/// the API can be loaded.
struct NoScripts;

impl ScriptEvaluator for NoScripts {
    fn eval_register(
        &self,
        _source: &str,
        key: &ModuleKey,
        _ctx: &mut RegisterContext,
    ) -> anyhow::Result<()> {
        anyhow::bail!("No script evaluator configured to run {key}")
    }
}

/// Builder for [`Loader`].
#[derive(Default)]
pub struct LoaderBuilder {
    config: Option<LoaderConfig>,
    transport: Option<Arc<dyn Transport>>,
    scripts: Option<Arc<dyn ScriptEvaluator>>,
    wasm: Option<Arc<dyn WasmRuntime>>,
}

impl LoaderBuilder {
    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Transport for every fetch. Defaults to `file:` plus `http(s):`,
    /// cached on disk when `cache` is configured.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn ScriptEvaluator>) -> Self {
        self.scripts = Some(evaluator);
        self
    }

    pub fn wasm_runtime(mut self, runtime: Arc<dyn WasmRuntime>) -> Self {
        self.wasm = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Loader> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let rules = Rules::new(&config)?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let standard: Arc<dyn Transport> =
                    Arc::new(SchemeTransport::standard(config.timeout)?);
                match &config.cache {
                    Some(dir) => Arc::new(CachingTransport::new(standard, Some(dir.clone()))?),
                    None => standard,
                }
            }
        };

        let records = Arc::new(RecordStore::new());
        let registry = Registry::with_records(records.clone());
        registry.set(EMPTY_MODULE, Namespace::empty());
        registry.set(SYSTEM_ENV_MODULE, config.env.namespace());

        debug!(base_url = %rules.base_url, packages = rules.packages.len(), "loader ready");

        Ok(Loader {
            inner: Arc::new(LoaderInner {
                config,
                rules,
                registry,
                records,
                metadata: DashMap::new(),
                package_configs: DashMap::new(),
                transport,
                scripts: self.scripts.unwrap_or_else(|| Arc::new(NoScripts)),
                wasm: self.wasm,
                globals: Object::new(),
                traces: DashMap::new(),
                eval_lock: ReentrantMutex::new(()),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn loader() -> Loader {
        Loader::builder()
            .config(LoaderConfig {
                base_url: "http://x.com/".into(),
                ..Default::default()
            })
            .transport(Arc::new(MemoryTransport::new()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builtin_modules_preloaded() {
        let loader = loader();
        assert!(loader.registry().get(EMPTY_MODULE).unwrap().is_empty_module());
        let env = loader.registry().get(SYSTEM_ENV_MODULE).unwrap();
        assert_eq!(env.get("default"), Some(Value::Boolean(true)));
        assert_eq!(env.get("dev"), Some(Value::Boolean(true)));
    }

    #[test]
    fn test_register_resolves_name() {
        let loader = loader();
        let key = loader
            .register("lib/a.js", vec![], |_, _| Ok(Declaration::new()))
            .unwrap();
        assert_eq!(key, "http://x.com/lib/a.js");
        assert!(loader.inner.records.has("http://x.com/lib/a.js"));
    }

    #[tokio::test]
    async fn test_import_registered_module() {
        let loader = loader();
        loader
            .register("a", vec![], |exporter, _| {
                exporter.export("x", 1);
                Ok(Declaration::new())
            })
            .unwrap();

        let namespace = loader.import_namespace("a", None).await.unwrap();
        assert_eq!(namespace.get("x"), Some(Value::Number(1.0)));
        assert!(loader.registry().has("http://x.com/a"));
        assert!(!loader.inner.records.has("http://x.com/a"));
    }

    #[tokio::test]
    async fn test_context_import_after_drop_fails() {
        let loader = loader();
        let context = loader.context(&ModuleKey::from("http://x.com/a.js"));
        drop(loader);
        let err = context.import("./b.js").await.unwrap_err();
        assert!(err.to_string().contains("was dropped"));
    }
}
