// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Shared fixtures for the integration tests.
//!
//! Module sources are served from a [`MemoryTransport`]; what a source
//! "does" when executed is a Rust closure registered per key on
//! [`Fixtures`].

#![allow(dead_code)]

use parking_lot::Mutex;
use spacey_loader::transport::MemoryTransport;
use spacey_loader::{
    AmdScope, CommonJsScope, GlobalScope, Loader, LoaderConfig, ModuleKey, RegisterContext,
    ScriptEvaluator,
};
use std::collections::HashMap;
use std::sync::Arc;

pub const BASE: &str = "http://app.test/";

type RegisterFixture = Arc<dyn Fn(&mut RegisterContext) + Send + Sync>;
type CommonJsFixture = Arc<dyn Fn(&CommonJsScope<'_>) -> anyhow::Result<()> + Send + Sync>;
type AmdFixture = Arc<dyn Fn(&mut AmdScope) + Send + Sync>;
type GlobalFixture = Arc<dyn Fn(&GlobalScope<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Script behaviors by module key, with a count of every execution.
#[derive(Default)]
pub struct Fixtures {
    register: Mutex<HashMap<String, RegisterFixture>>,
    commonjs: Mutex<HashMap<String, CommonJsFixture>>,
    amd: Mutex<HashMap<String, AmdFixture>>,
    global: Mutex<HashMap<String, GlobalFixture>>,
    runs: Mutex<HashMap<String, usize>>,
}

impl Fixtures {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_register(
        &self,
        key: &str,
        fixture: impl Fn(&mut RegisterContext) + Send + Sync + 'static,
    ) {
        self.register.lock().insert(key.to_string(), Arc::new(fixture));
    }

    pub fn on_commonjs(
        &self,
        key: &str,
        fixture: impl Fn(&CommonJsScope<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        self.commonjs.lock().insert(key.to_string(), Arc::new(fixture));
    }

    pub fn on_amd(&self, key: &str, fixture: impl Fn(&mut AmdScope) + Send + Sync + 'static) {
        self.amd.lock().insert(key.to_string(), Arc::new(fixture));
    }

    pub fn on_global(
        &self,
        key: &str,
        fixture: impl Fn(&GlobalScope<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        self.global.lock().insert(key.to_string(), Arc::new(fixture));
    }

    /// Executions of the script at `key` so far.
    pub fn runs(&self, key: &str) -> usize {
        self.runs.lock().get(key).copied().unwrap_or(0)
    }

    fn ran(&self, key: &str) {
        *self.runs.lock().entry(key.to_string()).or_insert(0) += 1;
    }
}

impl ScriptEvaluator for Fixtures {
    fn eval_register(
        &self,
        _source: &str,
        key: &ModuleKey,
        ctx: &mut RegisterContext,
    ) -> anyhow::Result<()> {
        self.ran(key);
        let fixture = self.register.lock().get(key.as_str()).cloned();
        match fixture {
            Some(fixture) => {
                fixture(ctx);
                Ok(())
            }
            None => anyhow::bail!("no register fixture for {key}"),
        }
    }

    fn eval_commonjs(&self, _source: &str, scope: &CommonJsScope<'_>) -> anyhow::Result<()> {
        self.ran(scope.key);
        let fixture = self.commonjs.lock().get(scope.key.as_str()).cloned();
        match fixture {
            Some(fixture) => fixture(scope),
            None => anyhow::bail!("no CommonJS fixture for {}", scope.key),
        }
    }

    fn eval_amd(&self, _source: &str, key: &ModuleKey, scope: &mut AmdScope) -> anyhow::Result<()> {
        self.ran(key);
        let fixture = self.amd.lock().get(key.as_str()).cloned();
        match fixture {
            Some(fixture) => {
                fixture(scope);
                Ok(())
            }
            None => anyhow::bail!("no AMD fixture for {key}"),
        }
    }

    fn eval_global(&self, _source: &str, scope: &GlobalScope<'_>) -> anyhow::Result<()> {
        self.ran(scope.key);
        let fixture = self.global.lock().get(scope.key.as_str()).cloned();
        match fixture {
            Some(fixture) => fixture(scope),
            None => anyhow::bail!("no global fixture for {}", scope.key),
        }
    }
}

/// A test environment: loader, transport and script fixtures.
pub struct Harness {
    pub loader: Loader,
    pub transport: Arc<MemoryTransport>,
    pub fixtures: Arc<Fixtures>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: LoaderConfig) -> Self {
        Self::with_transport(config, MemoryTransport::new())
    }

    pub fn with_transport(config: LoaderConfig, transport: MemoryTransport) -> Self {
        let transport = Arc::new(transport);
        let fixtures = Fixtures::new();
        let loader = Loader::builder()
            .config(config)
            .transport(transport.clone())
            .evaluator(fixtures.clone())
            .build()
            .expect("loader builds");
        Self {
            loader,
            transport,
            fixtures,
        }
    }

    /// Serve `source` at `BASE` + `path`.
    pub fn serve(&self, path: &str, source: &str) {
        self.transport.insert(url(path), source);
    }

    pub fn fetches(&self, path: &str) -> usize {
        self.transport.fetch_count(&url(path))
    }
}

/// Absolute URL of `path` under `BASE`.
pub fn url(path: &str) -> String {
    format!("{BASE}{path}")
}

pub fn config() -> LoaderConfig {
    LoaderConfig {
        base_url: BASE.into(),
        ..Default::default()
    }
}

pub fn config_from_json(json: &str) -> LoaderConfig {
    let mut config = LoaderConfig::from_json(json).expect("valid config");
    config.base_url = BASE.into();
    config
}

/// Smallest source detected as register format.
pub const REGISTER_SOURCE: &str = "System.register([], function () {});";
