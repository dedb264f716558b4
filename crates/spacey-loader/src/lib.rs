// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # spacey-loader
//!
//! A dynamic module loader in the mold of SystemJS 0.20.
//!
//! ## Overview
//!
//! The loader turns specifiers into canonical keys, fetches and translates
//! module sources, links the resulting module graph and evaluates it in
//! dependency order, including graphs with cycles:
//!
//! - Resolution: URL join, `map`, `paths`, packages (main, map,
//!   `defaultExtension`), conditional specifiers and plugin syntax
//! - Instantiation: `System.register`, CommonJS, AMD, global scripts and
//!   WebAssembly, with format detection, `meta` configuration, integrity
//!   checks, bundles and `depCache` preloading
//! - Linking: declarative live bindings and dynamic `require` modules, with
//!   failures cached until a key is invalidated
//!
//! Source text is executed by an embedder-provided
//! [`ScriptEvaluator`]; the loader itself never interprets JavaScript.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spacey_loader::{Declaration, Loader, LoaderConfig};
//!
//! let loader = Loader::new(LoaderConfig::default())?;
//! loader.register("app.js", vec![], |exporter, _| {
//!     exporter.export("answer", 42);
//!     Ok(Declaration::new())
//! })?;
//! let ns = loader.import_namespace("app.js", None).await?;
//! ```

#![warn(clippy::all)]

mod config;
mod error;
mod evaluator;
pub mod integrity;
mod key;
mod linker;
mod loader;
mod metadata;
mod namespace;
mod pipeline;
mod plugin;
mod record;
mod registry;
pub mod resolver;
mod script;
pub mod source;
mod trace;
pub mod transport;
mod value;

pub use config::{Format, LoaderConfig, MetaConfig, PackageConfig, SystemEnv};
pub use error::{ErrorKind, LoaderError, Result, Stage};
pub use evaluator::{CommonJsModule, Require};
pub use key::{HOST_BUILTIN_PREFIX, ModuleKey};
pub use loader::{Instantiate, Loader, LoaderBuilder, ModuleContext, Register, Resolve};
pub use metadata::Metadata;
pub use namespace::Namespace;
pub use pipeline::wasm;
pub use plugin::{Fetcher, LoaderPlugin, PluginRequest};
pub use record::{
    Declaration, Exporter, Instantiation, LoadRecord, ModuleKind, RecordStatus, RecordStore,
    Registration, Setter,
};
pub use registry::{EMPTY_MODULE, Registry, SYSTEM_ENV_MODULE};
pub use script::{
    AmdArgs, AmdDefine, AmdFactory, AmdScope, CommonJsScope, GlobalScope, RegisterContext,
    ScriptEvaluator, WasmRuntime,
};
pub use trace::LoadTrace;
pub use transport::{FetchRequest, Payload, Transport};
pub use value::{Function, Object, Value};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
