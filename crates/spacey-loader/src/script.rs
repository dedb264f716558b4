// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Script evaluation seams.
//!
//! The loader does not execute source text itself. A [`ScriptEvaluator`]
//! supplied by the embedder runs translated sources against explicit scope
//! values:
//!
//! - register-format sources receive a [`RegisterContext`] and call
//!   `register` on it (anonymously, or with a name when bundled)
//! - CommonJS sources receive a [`CommonJsScope`] exposing `require`,
//!   `module` and `exports`
//! - AMD sources receive an [`AmdScope`] and call `define` on it
//! - global scripts receive a [`GlobalScope`] wrapping the shared global
//!   object
//!
//! WebAssembly binaries are compiled by a [`WasmRuntime`].

use crate::error::{LoaderError, Result};
use crate::evaluator::{CommonJsModule, Require};
use crate::key::ModuleKey;
use crate::loader::ModuleContext;
use crate::namespace::Namespace;
use crate::record::{Declaration, Exporter, Registration};
use crate::value::{Object, Value};
use std::collections::BTreeMap;

/// Executes module sources.
///
/// Only `eval_register` is required; the other formats report themselves
/// unsupported unless overridden.
pub trait ScriptEvaluator: Send + Sync {
    /// Run a register-format source.
    fn eval_register(
        &self,
        source: &str,
        key: &ModuleKey,
        ctx: &mut RegisterContext,
    ) -> anyhow::Result<()>;

    /// Run a CommonJS module body.
    fn eval_commonjs(&self, _source: &str, scope: &CommonJsScope<'_>) -> anyhow::Result<()> {
        anyhow::bail!("CommonJS evaluation is not supported (loading {})", scope.key)
    }

    /// Run an AMD source, collecting its `define` calls.
    fn eval_amd(
        &self,
        _source: &str,
        key: &ModuleKey,
        _scope: &mut AmdScope,
    ) -> anyhow::Result<()> {
        anyhow::bail!("AMD evaluation is not supported (loading {key})")
    }

    /// Run a global script.
    fn eval_global(&self, _source: &str, scope: &GlobalScope<'_>) -> anyhow::Result<()> {
        anyhow::bail!("global script evaluation is not supported (loading {})", scope.key)
    }
}

/// Collects the registrations made by one executed script.
pub struct RegisterContext {
    key: ModuleKey,
    anonymous: Vec<Registration>,
    named: Vec<(String, Registration)>,
}

impl RegisterContext {
    pub fn new(key: ModuleKey) -> Self {
        Self {
            key,
            anonymous: Vec::new(),
            named: Vec::new(),
        }
    }

    /// Key of the script being executed.
    pub fn key(&self) -> &ModuleKey {
        &self.key
    }

    /// `System.register(deps, declare)`
    pub fn register(
        &mut self,
        deps: Vec<String>,
        declare: impl FnOnce(Exporter, ModuleContext) -> anyhow::Result<Declaration>
            + Send
            + 'static,
    ) {
        self.anonymous.push(Registration::declarative(deps, declare));
    }

    /// `System.register(name, deps, declare)`
    pub fn register_named(
        &mut self,
        name: impl Into<String>,
        deps: Vec<String>,
        declare: impl FnOnce(Exporter, ModuleContext) -> anyhow::Result<Declaration>
            + Send
            + 'static,
    ) {
        self.named
            .push((name.into(), Registration::declarative(deps, declare)));
    }

    /// `System.registerDynamic(deps, executingRequire, execute)`
    pub fn register_dynamic(
        &mut self,
        deps: Vec<String>,
        executing_require: bool,
        execute: impl FnOnce(&Require<'_>, &CommonJsModule) -> anyhow::Result<()> + Send + 'static,
    ) {
        self.anonymous
            .push(Registration::dynamic(deps, executing_require, execute));
    }

    /// `System.registerDynamic(name, deps, executingRequire, execute)`
    pub fn register_dynamic_named(
        &mut self,
        name: impl Into<String>,
        deps: Vec<String>,
        executing_require: bool,
        execute: impl FnOnce(&Require<'_>, &CommonJsModule) -> anyhow::Result<()> + Send + 'static,
    ) {
        self.named.push((
            name.into(),
            Registration::dynamic(deps, executing_require, execute),
        ));
    }

    /// Add a prebuilt registration, anonymous when `name` is `None`.
    pub fn push(&mut self, name: Option<String>, registration: Registration) {
        match name {
            Some(name) => self.named.push((name, registration)),
            None => self.anonymous.push(registration),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.anonymous.is_empty() && self.named.is_empty()
    }

    /// Split into the anonymous registration and the named ones.
    pub(crate) fn into_parts(self) -> Result<(Option<Registration>, Vec<(String, Registration)>)> {
        let RegisterContext {
            key,
            mut anonymous,
            named,
        } = self;
        if anonymous.len() > 1 {
            return Err(LoaderError::shape(format!(
                "Multiple anonymous register calls in module {key}"
            )));
        }
        Ok((anonymous.pop(), named))
    }
}

/// Scope of a CommonJS module body.
pub struct CommonJsScope<'a> {
    pub key: &'a ModuleKey,
    pub require: &'a Require<'a>,
    pub module: &'a CommonJsModule,
    /// Module URL
    pub filename: &'a str,
    /// Module URL up to the last `/`
    pub dirname: &'a str,
}

impl CommonJsScope<'_> {
    pub fn require(&self, name: &str) -> Result<Value> {
        self.require.require(name)
    }

    /// Current `module.exports`.
    pub fn exports(&self) -> Value {
        self.module.exports()
    }

    /// Assign `module.exports`.
    pub fn set_exports(&self, value: impl Into<Value>) {
        self.module.set_exports(value);
    }
}

/// Arguments handed to an AMD factory.
pub struct AmdArgs<'a> {
    /// One value per declared dependency; `exports` and `module` map to the
    /// module's own surface and `require` to `undefined` (use `require`)
    pub values: Vec<Value>,
    pub require: &'a Require<'a>,
    pub module: &'a CommonJsModule,
}

pub type AmdFactory = Box<dyn for<'a> FnOnce(AmdArgs<'a>) -> anyhow::Result<Option<Value>> + Send>;

/// One `define` call.
pub struct AmdDefine {
    pub name: Option<String>,
    pub deps: Vec<String>,
    pub factory: AmdFactory,
}

/// Collects the `define` calls of an AMD script.
#[derive(Default)]
pub struct AmdScope {
    defines: Vec<AmdDefine>,
}

impl AmdScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// `define(deps, factory)`; a returned value replaces `module.exports`.
    pub fn define(
        &mut self,
        deps: Vec<String>,
        factory: impl FnOnce(AmdArgs<'_>) -> anyhow::Result<Option<Value>> + Send + 'static,
    ) {
        self.defines.push(AmdDefine {
            name: None,
            deps,
            factory: Box::new(factory),
        });
    }

    /// `define(name, deps, factory)`
    pub fn define_named(
        &mut self,
        name: impl Into<String>,
        deps: Vec<String>,
        factory: impl FnOnce(AmdArgs<'_>) -> anyhow::Result<Option<Value>> + Send + 'static,
    ) {
        self.defines.push(AmdDefine {
            name: Some(name.into()),
            deps,
            factory: Box::new(factory),
        });
    }

    /// `define(value)`
    pub fn define_value(&mut self, value: Value) {
        self.define(Vec::new(), move |_| Ok(Some(value)));
    }

    pub(crate) fn into_defines(self) -> Vec<AmdDefine> {
        self.defines
    }
}

/// Scope of a global script.
pub struct GlobalScope<'a> {
    pub key: &'a ModuleKey,
    /// The loader-wide global object
    pub globals: &'a Object,
}

/// Compiles and instantiates WebAssembly modules.
pub trait WasmRuntime: Send + Sync {
    /// Instantiate `bytes` with one namespace per imported module name,
    /// returning the instance exports.
    fn instantiate(
        &self,
        key: &ModuleKey,
        bytes: &[u8],
        imports: &BTreeMap<String, Namespace>,
    ) -> anyhow::Result<Vec<(String, Value)>>;
}
