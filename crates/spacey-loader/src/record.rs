// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Load records, link records and module registrations.
//!
//! A [`LoadRecord`] tracks one key from the first request until it is
//! evaluated. While it is in flight it owns a [`LinkRecord`] holding the
//! memoized pipeline futures, the registered module body and the live
//! binding object. Exactly one of "linking", "evaluated", "load failed" or
//! "eval failed" holds at any time.

use crate::error::{LoaderError, Result};
use crate::evaluator::{CommonJsModule, Require};
use crate::key::ModuleKey;
use crate::loader::ModuleContext;
use crate::namespace::Namespace;
use crate::value::{Object, Value};
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Receives a dependency's namespace whenever its bindings change.
pub type Setter = Arc<dyn Fn(&Namespace) + Send + Sync>;

/// Body of a declarative module.
pub type Execute = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// Declaration function of a declarative registration.
pub type Declare = Box<dyn FnOnce(Exporter, ModuleContext) -> anyhow::Result<Declaration> + Send>;

/// Body of a dynamic (CommonJS-style) module.
pub type DynamicExecute =
    Box<dyn FnOnce(&Require<'_>, &CommonJsModule) -> anyhow::Result<()> + Send>;

pub(crate) type SharedResult<T> = Shared<BoxFuture<'static, Result<T>>>;
type Importers = Arc<Mutex<Vec<Setter>>>;

/// How a module's body consumes its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// Live bindings through setters
    Declarative,
    /// `require`/`exports`/`module`
    Dynamic,
}

/// What a declare function hands back: one optional setter per dependency
/// and the module body.
#[derive(Default)]
pub struct Declaration {
    pub setters: Vec<Option<Setter>>,
    pub execute: Option<Execute>,
}

impl Declaration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a setter for the next dependency.
    pub fn setter(mut self, setter: impl Fn(&Namespace) + Send + Sync + 'static) -> Self {
        self.setters.push(Some(Arc::new(setter)));
        self
    }

    /// The next dependency has no setter.
    pub fn skip(mut self) -> Self {
        self.setters.push(None);
        self
    }

    pub fn execute(
        mut self,
        execute: impl FnOnce() -> anyhow::Result<()> + Send + 'static,
    ) -> Self {
        self.execute = Some(Box::new(execute));
        self
    }
}

/// A module registration produced by `register`/`register_dynamic` or by a
/// translated source.
pub enum Registration {
    Declarative {
        deps: Vec<String>,
        declare: Declare,
    },
    Dynamic {
        deps: Vec<String>,
        executing_require: bool,
        execute: DynamicExecute,
    },
}

impl Registration {
    pub fn declarative(
        deps: Vec<String>,
        declare: impl FnOnce(Exporter, ModuleContext) -> anyhow::Result<Declaration>
            + Send
            + 'static,
    ) -> Self {
        Registration::Declarative {
            deps,
            declare: Box::new(declare),
        }
    }

    /// `executing_require`: the body requires its dependencies itself.
    /// Otherwise every dependency is required before the body runs.
    pub fn dynamic(
        deps: Vec<String>,
        executing_require: bool,
        execute: impl FnOnce(&Require<'_>, &CommonJsModule) -> anyhow::Result<()> + Send + 'static,
    ) -> Self {
        Registration::Dynamic {
            deps,
            executing_require,
            execute: Box::new(execute),
        }
    }

    pub fn dependencies(&self) -> &[String] {
        match self {
            Registration::Declarative { deps, .. } | Registration::Dynamic { deps, .. } => deps,
        }
    }

    pub fn kind(&self) -> ModuleKind {
        match self {
            Registration::Declarative { .. } => ModuleKind::Declarative,
            Registration::Dynamic { .. } => ModuleKind::Dynamic,
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("kind", &self.kind())
            .field("deps", &self.dependencies())
            .finish()
    }
}

/// Writes a declarative module's exports and re-notifies its importers.
#[derive(Clone)]
pub struct Exporter {
    bindings: Object,
    importers: Importers,
}

impl Exporter {
    /// Export a single binding. Importers are notified only on change.
    pub fn export(&self, name: &str, value: impl Into<Value>) -> Value {
        let value = value.into();
        let previous = self.bindings.set(name, value.clone());
        if previous.as_ref() != Some(&value) {
            self.notify();
        }
        value
    }

    /// Export several bindings at once (`export * from`, object form).
    pub fn export_all<K: Into<String>>(&self, entries: impl IntoIterator<Item = (K, Value)>) {
        let mut changed = false;
        for (name, value) in entries {
            let previous = self.bindings.set(name, value.clone());
            changed |= previous.as_ref() != Some(&value);
        }
        if changed {
            self.notify();
        }
    }

    /// The live binding object.
    pub fn bindings(&self) -> &Object {
        &self.bindings
    }

    fn notify(&self) {
        let setters = self.importers.lock().clone();
        if setters.is_empty() {
            return;
        }
        let view = Namespace::new(self.bindings.clone());
        for setter in &setters {
            setter(&view);
        }
    }
}

/// Outcome of instantiating a key: a finished namespace or a record still
/// linking.
#[derive(Clone)]
pub enum Instantiation {
    Namespace(Namespace),
    Record(Arc<LoadRecord>),
}

impl fmt::Debug for Instantiation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instantiation::Namespace(ns) => f.debug_tuple("Namespace").field(ns).finish(),
            Instantiation::Record(record) => f.debug_tuple("Record").field(record.key()).finish(),
        }
    }
}

/// Lifecycle state of a load record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Linking,
    Evaluated,
    LoadFailed,
    EvalFailed,
}

#[derive(Clone)]
pub(crate) enum LoadState {
    Linking(Arc<LinkRecord>),
    Evaluated(Namespace),
    LoadFailed(LoaderError),
    EvalFailed(LoaderError),
}

/// Per-key loading state.
pub struct LoadRecord {
    key: ModuleKey,
    state: RwLock<LoadState>,
    registration: Mutex<Option<Registration>>,
    importers: Importers,
}

impl LoadRecord {
    pub(crate) fn new(key: ModuleKey) -> Arc<Self> {
        Arc::new(Self {
            key,
            state: RwLock::new(LoadState::Linking(Arc::new(LinkRecord::new()))),
            registration: Mutex::new(None),
            importers: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn key(&self) -> &ModuleKey {
        &self.key
    }

    pub fn status(&self) -> RecordStatus {
        match &*self.state.read() {
            LoadState::Linking(_) => RecordStatus::Linking,
            LoadState::Evaluated(_) => RecordStatus::Evaluated,
            LoadState::LoadFailed(_) => RecordStatus::LoadFailed,
            LoadState::EvalFailed(_) => RecordStatus::EvalFailed,
        }
    }

    /// The cached load or evaluation error, if any.
    pub fn error(&self) -> Option<LoaderError> {
        match &*self.state.read() {
            LoadState::LoadFailed(err) | LoadState::EvalFailed(err) => Some(err.clone()),
            _ => None,
        }
    }

    pub fn namespace(&self) -> Option<Namespace> {
        match &*self.state.read() {
            LoadState::Evaluated(ns) => Some(ns.clone()),
            _ => None,
        }
    }

    pub(crate) fn state(&self) -> LoadState {
        self.state.read().clone()
    }

    pub(crate) fn set_state(&self, state: LoadState) {
        *self.state.write() = state;
    }

    pub(crate) fn link(&self) -> Option<Arc<LinkRecord>> {
        match &*self.state.read() {
            LoadState::Linking(link) => Some(link.clone()),
            _ => None,
        }
    }

    /// Stash a registration to be picked up by the next instantiate.
    ///
    /// Returns false when the record already has a module body.
    pub(crate) fn set_registration(&self, registration: Registration) -> bool {
        let accepting = self.link().is_some_and(|link| link.linked().is_none());
        if accepting {
            *self.registration.lock() = Some(registration);
        }
        accepting
    }

    pub(crate) fn take_registration(&self) -> Option<Registration> {
        self.registration.lock().take()
    }

    /// Whether a registration is waiting to be instantiated.
    pub fn has_registration(&self) -> bool {
        self.registration.lock().is_some()
    }

    pub(crate) fn add_importer(&self, setter: Setter) {
        self.importers.lock().push(setter);
    }

    /// Drain the importer setters.
    pub(crate) fn take_importers(&self) -> Vec<Setter> {
        std::mem::take(&mut *self.importers.lock())
    }

    pub(crate) fn exporter(&self, bindings: Object) -> Exporter {
        Exporter {
            bindings,
            importers: self.importers.clone(),
        }
    }
}

impl fmt::Debug for LoadRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadRecord")
            .field("key", &self.key)
            .field("status", &self.status())
            .finish()
    }
}

/// In-flight state of a record: memoized stages plus the registered body.
pub(crate) struct LinkRecord {
    instantiate: Mutex<Option<SharedResult<Instantiation>>>,
    link_deps: Mutex<Option<SharedResult<()>>>,
    linked: OnceLock<Linked>,
    instantiations: RwLock<Vec<Instantiation>>,
    bindings: Object,
}

pub(crate) struct Linked {
    pub(crate) dependencies: Vec<String>,
    pub(crate) body: ModuleBody,
}

pub(crate) enum ModuleBody {
    Declarative {
        setters: Vec<Option<Setter>>,
        execute: Mutex<Option<Execute>>,
    },
    Dynamic {
        executing_require: bool,
        execute: Mutex<Option<DynamicExecute>>,
        module: CommonJsModule,
    },
}

impl Linked {
    pub(crate) fn kind(&self) -> ModuleKind {
        match self.body {
            ModuleBody::Declarative { .. } => ModuleKind::Declarative,
            ModuleBody::Dynamic { .. } => ModuleKind::Dynamic,
        }
    }
}

impl LinkRecord {
    fn new() -> Self {
        Self {
            instantiate: Mutex::new(None),
            link_deps: Mutex::new(None),
            linked: OnceLock::new(),
            instantiations: RwLock::new(Vec::new()),
            bindings: Object::new(),
        }
    }

    pub(crate) fn memoize_instantiate(
        &self,
        start: impl FnOnce() -> SharedResult<Instantiation>,
    ) -> SharedResult<Instantiation> {
        self.instantiate.lock().get_or_insert_with(start).clone()
    }

    pub(crate) fn memoize_link(
        &self,
        start: impl FnOnce() -> SharedResult<()>,
    ) -> SharedResult<()> {
        self.link_deps.lock().get_or_insert_with(start).clone()
    }

    pub(crate) fn linked(&self) -> Option<&Linked> {
        self.linked.get()
    }

    pub(crate) fn set_linked(&self, key: &ModuleKey, linked: Linked) -> Result<()> {
        self.linked
            .set(linked)
            .map_err(|_| LoaderError::shape(format!("Module {key} was instantiated twice")))
    }

    pub(crate) fn bindings(&self) -> &Object {
        &self.bindings
    }

    pub(crate) fn instantiations(&self) -> Vec<Instantiation> {
        self.instantiations.read().clone()
    }

    pub(crate) fn set_instantiations(&self, instantiations: Vec<Instantiation>) {
        *self.instantiations.write() = instantiations;
    }

    /// The in-progress module object as importers see it before evaluation
    /// completes.
    pub(crate) fn snapshot(&self) -> Namespace {
        match self.linked().map(|linked| &linked.body) {
            Some(ModuleBody::Dynamic { module, .. }) => {
                Namespace::with_default(self.bindings.clone(), module.exports())
            }
            _ => Namespace::new(self.bindings.clone()),
        }
    }

    /// What `require` hands back for a dependency caught mid-cycle.
    pub(crate) fn partial_value(&self) -> Value {
        self.snapshot().unwrap_default()
    }
}

/// Records for keys that are loading, or that failed and cache their error.
#[derive(Default)]
pub struct RecordStore {
    records: DashMap<ModuleKey, Arc<LoadRecord>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<LoadRecord>> {
        self.records.get(key).map(|entry| entry.clone())
    }

    pub fn has(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    /// The record for `key`, created when absent.
    pub fn get_or_create(&self, key: &ModuleKey) -> Arc<LoadRecord> {
        self.records
            .entry(key.clone())
            .or_insert_with(|| LoadRecord::new(key.clone()))
            .clone()
    }

    pub fn remove(&self, key: &str) -> Option<Arc<LoadRecord>> {
        self.records.remove(key).map(|(_, record)| record)
    }

    /// Remove `key` only while it still maps to `record`.
    pub(crate) fn remove_if_same(&self, record: &Arc<LoadRecord>) {
        self.records
            .remove_if(record.key().as_str(), |_, current| Arc::ptr_eq(current, record));
    }

    pub fn keys(&self) -> Vec<ModuleKey> {
        self.records.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_exporter_notifies_on_change_only() {
        let record = LoadRecord::new(ModuleKey::from("a"));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        record.add_importer(Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let exporter = record.exporter(Object::new());
        exporter.export("x", 1);
        exporter.export("x", 1);
        exporter.export("x", 2);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_record_store_get_or_create_is_stable() {
        let store = RecordStore::new();
        let key = ModuleKey::from("http://x/a.js");
        let first = store.get_or_create(&key);
        let second = store.get_or_create(&key);
        assert!(Arc::ptr_eq(&first, &second));

        store.remove_if_same(&LoadRecord::new(key.clone()));
        assert!(store.has("http://x/a.js"));
        store.remove_if_same(&first);
        assert!(store.is_empty());
    }

    #[test]
    fn test_registration_rejected_once_linked() {
        let record = LoadRecord::new(ModuleKey::from("a"));
        let empty = || Registration::declarative(vec![], |_, _| Ok(Declaration::new()));
        assert!(record.set_registration(empty()));
        assert!(record.has_registration());

        record.set_state(LoadState::Evaluated(Namespace::empty()));
        assert!(!record.set_registration(empty()));
    }

    #[test]
    fn test_declaration_builder() {
        let declaration = Declaration::new().skip().setter(|_| {}).execute(|| Ok(()));
        assert_eq!(declaration.setters.len(), 2);
        assert!(declaration.setters[0].is_none());
        assert!(declaration.execute.is_some());
    }
}
