// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module evaluation.
//!
//! Evaluation walks a fully linked graph depth-first. Declarative modules
//! evaluate their dependencies before running their own body; dynamic
//! modules pull dependencies in through `require`, lazily by default.
//!
//! Cycles are tracked with a [`VisitSet`]. Re-entering a record that is
//! still being evaluated stops the descent: within one module kind the
//! importer sees live bindings, across kinds it sees whatever the other
//! module has executed so far.

use crate::error::{LoaderError, Result, Stage};
use crate::key::ModuleKey;
use crate::loader::Loader;
use crate::namespace::Namespace;
use crate::record::{Instantiation, LinkRecord, LoadRecord, LoadState, ModuleBody, ModuleKind};
use crate::value::{Object, Value};
use parking_lot::RwLock;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

/// How a re-entered record relates to the current descent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    /// The record was entered within the current run of same-kind modules
    SameKind,
    /// The cycle crosses a declarative/dynamic boundary
    CrossKind,
}

/// Outcome of entering a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// First visit; pass the token back to [`VisitSet::leave`]
    Enter(FrameToken),
    /// Already being evaluated
    Cycle(CycleKind),
}

/// Marks whether entering a record opened a new kind frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameToken {
    pushed: bool,
}

struct Frame {
    kind: ModuleKind,
    keys: HashSet<ModuleKey>,
}

/// Records entered during one evaluation, across all kinds, plus a stack
/// of per-kind frames. A new frame starts whenever the descent crosses
/// from one module kind into the other.
#[derive(Default)]
pub struct VisitSet {
    entered: RefCell<HashSet<ModuleKey>>,
    frames: RefCell<Vec<Frame>>,
}

impl VisitSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self, key: &ModuleKey, kind: ModuleKind) -> Visit {
        let mut frames = self.frames.borrow_mut();
        if self.entered.borrow().contains(key) {
            let same = frames
                .last()
                .is_some_and(|frame| frame.kind == kind && frame.keys.contains(key));
            return Visit::Cycle(if same {
                CycleKind::SameKind
            } else {
                CycleKind::CrossKind
            });
        }

        self.entered.borrow_mut().insert(key.clone());
        let pushed = frames.last().is_none_or(|frame| frame.kind != kind);
        if pushed {
            frames.push(Frame {
                kind,
                keys: HashSet::new(),
            });
        }
        if let Some(frame) = frames.last_mut() {
            frame.keys.insert(key.clone());
        }
        Visit::Enter(FrameToken { pushed })
    }

    pub fn leave(&self, token: FrameToken) {
        if token.pushed {
            self.frames.borrow_mut().pop();
        }
    }

    #[cfg(test)]
    fn contains(&self, key: &ModuleKey) -> bool {
        self.entered.borrow().contains(key)
    }

    /// Depth of the kind-frame stack.
    #[cfg(test)]
    fn depth(&self) -> usize {
        self.frames.borrow().len()
    }
}

/// The `module` object of a dynamic module.
///
/// `module.exports` doubles as the module's default export.
#[derive(Clone)]
pub struct CommonJsModule {
    id: ModuleKey,
    exports: Arc<RwLock<Value>>,
    bindings: Object,
    es_module: Arc<AtomicBool>,
}

impl CommonJsModule {
    pub(crate) fn new(id: ModuleKey, bindings: Object) -> Self {
        let exports = Value::Object(Object::new());
        bindings.set("default", exports.clone());
        Self {
            id,
            exports: Arc::new(RwLock::new(exports)),
            bindings,
            es_module: Arc::new(AtomicBool::new(false)),
        }
    }

    /// `module.id`
    pub fn id(&self) -> &ModuleKey {
        &self.id
    }

    /// `module.exports`
    pub fn exports(&self) -> Value {
        self.exports.read().clone()
    }

    /// `module.exports = value`
    pub fn set_exports(&self, value: impl Into<Value>) {
        let value = value.into();
        *self.exports.write() = value.clone();
        self.bindings.set("default", value);
    }

    /// Treat `module.exports` as an ES module object even without an
    /// `__esModule` property.
    pub fn mark_es_module(&self) {
        self.es_module.store(true, Ordering::Release);
    }

    pub fn is_es_module(&self) -> bool {
        self.es_module.load(Ordering::Acquire)
    }

    /// `exports.name = value`
    pub fn export(&self, name: &str, value: impl Into<Value>) -> anyhow::Result<()> {
        match self.exports() {
            Value::Object(exports) => {
                exports.set(name, value);
                Ok(())
            }
            other => anyhow::bail!(
                "Cannot set property {name} on module.exports of {} ({})",
                self.id,
                other.type_of()
            ),
        }
    }
}

impl fmt::Debug for CommonJsModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommonJsModule").field("id", &self.id).finish()
    }
}

/// The `require` function of a dynamic module.
///
/// Only the module's declared dependencies can be required.
pub struct Require<'a> {
    evaluator: &'a Evaluator<'a>,
    key: &'a ModuleKey,
    dependencies: &'a [String],
    instantiations: &'a [Instantiation],
}

impl Require<'_> {
    /// Evaluate (if needed) and return a declared dependency.
    ///
    /// Dynamic dependencies return their `module.exports`; a dependency
    /// caught mid-cycle returns its current snapshot.
    pub fn require(&self, name: &str) -> Result<Value> {
        let index = self
            .dependencies
            .iter()
            .position(|dep| dep == name)
            .ok_or_else(|| {
                LoaderError::eval(format!(
                    "Module {name} not declared as a dependency of {}",
                    self.key
                ))
            })?;
        let instantiation = self.instantiations.get(index).ok_or_else(|| {
            LoaderError::shape(format!("Dependency {name} of {} was never linked", self.key))
        })?;

        match instantiation {
            Instantiation::Namespace(ns) => Ok(ns.unwrap_default()),
            Instantiation::Record(dep) => {
                self.evaluator.evaluate(dep)?;
                match dep.state() {
                    LoadState::Evaluated(ns) => Ok(ns.unwrap_default()),
                    LoadState::Linking(link) => Ok(link.partial_value()),
                    LoadState::LoadFailed(err) | LoadState::EvalFailed(err) => Err(err),
                }
            }
        }
    }

    /// Declared dependency names.
    pub fn dependencies(&self) -> &[String] {
        self.dependencies
    }
}

/// One evaluation pass over a linked graph.
pub(crate) struct Evaluator<'a> {
    loader: &'a Loader,
    visits: VisitSet,
}

impl<'a> Evaluator<'a> {
    /// Evaluate `record` and return its namespace. Evaluation is serialized
    /// loader-wide.
    pub(crate) fn ensure_evaluated(
        loader: &'a Loader,
        record: &Arc<LoadRecord>,
    ) -> Result<Namespace> {
        let _guard = loader.inner.eval_lock.lock();
        let evaluator = Evaluator {
            loader,
            visits: VisitSet::new(),
        };
        evaluator.evaluate(record)?;
        match record.state() {
            LoadState::Evaluated(ns) => Ok(ns),
            LoadState::LoadFailed(err) | LoadState::EvalFailed(err) => Err(err),
            LoadState::Linking(_) => Err(LoaderError::shape(format!(
                "Module {} did not finish evaluating",
                record.key()
            ))),
        }
    }

    pub(crate) fn evaluate(&self, record: &Arc<LoadRecord>) -> Result<()> {
        let link = match record.state() {
            LoadState::Evaluated(_) => return Ok(()),
            LoadState::LoadFailed(err) | LoadState::EvalFailed(err) => return Err(err),
            LoadState::Linking(link) => link,
        };
        let linked = link.linked().ok_or_else(|| {
            LoaderError::shape(format!(
                "Module {} was evaluated before it was instantiated",
                record.key()
            ))
        })?;

        let token = match self.visits.enter(record.key(), linked.kind()) {
            Visit::Enter(token) => token,
            Visit::Cycle(kind) => {
                debug!(key = %record.key(), ?kind, "cycle reached, using partial exports");
                return Ok(());
            }
        };

        trace!(key = %record.key(), kind = ?linked.kind(), "evaluating");
        let instantiations = link.instantiations();
        let outcome = match &linked.body {
            ModuleBody::Declarative { execute, .. } => {
                let execute = execute.lock().take();
                self.run_declarative(&instantiations, execute)
            }
            ModuleBody::Dynamic {
                executing_require,
                execute,
                module,
            } => {
                let require = Require {
                    evaluator: self,
                    key: record.key(),
                    dependencies: &linked.dependencies,
                    instantiations: &instantiations,
                };
                let execute = execute.lock().take();
                self.run_dynamic(&require, module, *executing_require, execute)
            }
        };
        self.visits.leave(token);

        match outcome {
            Ok(()) => {
                self.finish(record, &link);
                Ok(())
            }
            Err(err) => {
                let err = err.with_stage(Stage::Evaluating, record.key(), None);
                record.set_state(LoadState::EvalFailed(err.clone()));
                Err(err)
            }
        }
    }

    fn run_declarative(
        &self,
        instantiations: &[Instantiation],
        execute: Option<crate::record::Execute>,
    ) -> Result<()> {
        for instantiation in instantiations {
            if let Instantiation::Record(dep) = instantiation {
                self.evaluate(dep)?;
            }
        }
        match execute {
            Some(execute) => execute().map_err(LoaderError::thrown),
            None => Ok(()),
        }
    }

    fn run_dynamic(
        &self,
        require: &Require<'_>,
        module: &CommonJsModule,
        executing_require: bool,
        execute: Option<crate::record::DynamicExecute>,
    ) -> Result<()> {
        if !executing_require {
            for dep in require.dependencies() {
                require.require(dep)?;
            }
        }
        if let Some(execute) = execute {
            execute(require, module).map_err(LoaderError::thrown)?;
        }
        Ok(())
    }

    /// Freeze the module object, publish it and retire the link record.
    fn finish(&self, record: &Arc<LoadRecord>, link: &LinkRecord) {
        let Some(linked) = link.linked() else { return };
        let namespace = match &linked.body {
            ModuleBody::Declarative { .. } => Namespace::new(link.bindings().clone()),
            ModuleBody::Dynamic { module, .. } => {
                let exports = module.exports();
                lift_es_module(link.bindings(), &exports, module.is_es_module());
                Namespace::with_default(link.bindings().clone(), exports)
            }
        };

        let inner = &self.loader.inner;
        inner.registry.set(record.key().clone(), namespace.clone());
        record.set_state(LoadState::Evaluated(namespace.clone()));
        inner.records.remove_if_same(record);
        debug!(key = %record.key(), exports = namespace.keys().len(), "evaluated");

        if linked.kind() == ModuleKind::Dynamic {
            for setter in record.take_importers() {
                setter(&namespace);
            }
        }
    }
}

/// Copy the members of an ES module export object onto the namespace
/// bindings so named imports see them. `forced` comes from `esModule`
/// metadata; otherwise the object must carry a truthy `__esModule`.
fn lift_es_module(bindings: &Object, exports: &Value, forced: bool) {
    let Value::Object(exports) = exports else { return };
    if !forced && !exports.get("__esModule").is_some_and(|flag| flag.to_boolean()) {
        return;
    }
    for (name, value) in exports.entries() {
        bindings.set(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visit_same_kind_cycle() {
        let visits = VisitSet::new();
        let a = ModuleKey::from("a");
        let b = ModuleKey::from("b");

        assert!(matches!(visits.enter(&a, ModuleKind::Declarative), Visit::Enter(_)));
        assert!(matches!(visits.enter(&b, ModuleKind::Declarative), Visit::Enter(_)));
        assert_eq!(visits.depth(), 1);
        assert_eq!(
            visits.enter(&a, ModuleKind::Declarative),
            Visit::Cycle(CycleKind::SameKind)
        );
    }

    #[test]
    fn test_visit_cross_kind_cycle() {
        let visits = VisitSet::new();
        let esm = ModuleKey::from("esm");
        let cjs = ModuleKey::from("cjs");

        let Visit::Enter(outer) = visits.enter(&esm, ModuleKind::Declarative) else {
            panic!("expected enter");
        };
        let Visit::Enter(inner) = visits.enter(&cjs, ModuleKind::Dynamic) else {
            panic!("expected enter");
        };
        assert_eq!(visits.depth(), 2);
        assert_eq!(
            visits.enter(&esm, ModuleKind::Declarative),
            Visit::Cycle(CycleKind::CrossKind)
        );

        visits.leave(inner);
        visits.leave(outer);
        assert_eq!(visits.depth(), 0);
        assert!(visits.contains(&cjs));
    }

    #[test]
    fn test_lift_es_module() {
        let bindings = Object::new();
        let exports = Object::from_entries([
            ("__esModule", Value::from(true)),
            ("named", Value::from(1)),
            ("default", Value::from("d")),
        ]);
        lift_es_module(&bindings, &Value::from(exports), false);
        assert_eq!(bindings.get("named"), Some(Value::Number(1.0)));
        assert_eq!(bindings.get("default"), Some(Value::from("d")));

        let plain = Object::new();
        let exports = Value::from(Object::from_entries([("x", Value::from(1))]));
        lift_es_module(&plain, &exports, false);
        assert!(plain.is_empty());

        lift_es_module(&plain, &exports, true);
        assert_eq!(plain.get("x"), Some(Value::Number(1.0)));
    }

    #[test]
    fn test_commonjs_module_exports_mirror_default() {
        let bindings = Object::new();
        let module = CommonJsModule::new(ModuleKey::from("m"), bindings.clone());
        module.export("a", 1).unwrap();
        assert_eq!(module.exports().get("a"), Some(Value::Number(1.0)));

        module.set_exports("replaced");
        assert_eq!(bindings.get("default"), Some(Value::from("replaced")));
        assert!(module.export("b", 2).is_err());
    }
}
