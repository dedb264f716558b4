// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Bundles, depCache preloading, integrity and WebAssembly modules.

mod common;

use common::{Fixtures, Harness, REGISTER_SOURCE, config, config_from_json, url};
use parking_lot::Mutex;
use spacey_loader::transport::MemoryTransport;
use spacey_loader::{
    Declaration, ErrorKind, Loader, ModuleKey, Namespace, Value, WasmRuntime, integrity, wasm,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_bundle_serves_all_members_with_one_fetch() {
    let h = Harness::with_config(config_from_json(
        r#"{ "bundles": { "bundle.js": ["a.js", "b.js"] } }"#,
    ));
    h.serve("bundle.js", "System.register('a.js', ['./b.js'], function () {});");
    h.fixtures.on_register(&url("bundle.js"), |ctx| {
        ctx.register_named("a.js", vec!["./b.js".into()], |exporter, _| {
            let b = Arc::new(Mutex::new(Value::Undefined));
            let slot = b.clone();
            Ok(Declaration::new()
                .setter(move |ns| *slot.lock() = ns.get("b").unwrap_or_default())
                .execute(move || {
                    exporter.export("a", b.lock().clone());
                    Ok(())
                }))
        });
        ctx.register_named("b.js", vec![], |exporter, _| {
            exporter.export("b", "from b");
            Ok(Declaration::new())
        });
    });

    let ns = h.loader.import_namespace("a.js", None).await.unwrap();
    assert_eq!(ns.get("a"), Some(Value::from("from b")));

    let b = h.loader.import_namespace("b.js", None).await.unwrap();
    assert_eq!(b.get("b"), Some(Value::from("from b")));
    assert_eq!(h.fetches("bundle.js"), 1);
    assert_eq!(h.fetches("a.js"), 0);
    assert_eq!(h.fetches("b.js"), 0);
}

#[tokio::test]
async fn test_bundle_directive_registers_named_modules() {
    let h = Harness::new();
    h.serve("all.js", "\"bundle\";\nSystem.register('x.js', [], function () {});");
    h.fixtures.on_register(&url("all.js"), |ctx| {
        ctx.register_named("x.js", vec![], |exporter, _| {
            exporter.export("x", 1);
            Ok(Declaration::new())
        });
    });

    let bundle = h.loader.import_namespace("all.js", None).await.unwrap();
    assert!(bundle.is_empty_module());

    let x = h.loader.import_namespace("x.js", None).await.unwrap();
    assert_eq!(x.get("x"), Some(Value::Number(1.0)));
    assert_eq!(h.fetches("x.js"), 0);
}

#[tokio::test]
async fn test_dep_cache_preloads_without_evaluating() {
    let h = Harness::with_config(config_from_json(
        r#"{ "depCache": { "main.js": ["./dep.js"] } }"#,
    ));
    h.serve("main.js", REGISTER_SOURCE);
    h.fixtures.on_register(&url("main.js"), |ctx| {
        ctx.register(vec![], |_, _| Ok(Declaration::new()))
    });
    h.serve("dep.js", REGISTER_SOURCE);
    h.fixtures.on_register(&url("dep.js"), |ctx| {
        ctx.register(vec![], |exporter, _| {
            exporter.export("lazy", true);
            Ok(Declaration::new())
        })
    });

    h.loader.import("main.js", None).await.unwrap();
    for _ in 0..100 {
        if h.fetches("dep.js") > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.fetches("dep.js"), 1);
    assert!(!h.loader.registry().has(&url("dep.js")));

    // a later import reuses the preloaded record
    h.loader.import("dep.js", None).await.unwrap();
    assert_eq!(h.fetches("dep.js"), 1);
}

#[tokio::test]
async fn test_integrity_is_checked() {
    let good = REGISTER_SOURCE;
    let json = format!(
        r#"{{ "meta": {{
            "good.js": {{ "integrity": "{}" }},
            "bad.js": {{ "integrity": "{}" }}
        }} }}"#,
        integrity::compute(good.as_bytes()),
        integrity::compute(b"something else"),
    );
    let h = Harness::with_config(config_from_json(&json));
    for path in ["good.js", "bad.js"] {
        h.serve(path, good);
        h.fixtures.on_register(&url(path), |ctx| {
            ctx.register(vec![], |_, _| Ok(Declaration::new()))
        });
    }

    h.loader.import("good.js", None).await.unwrap();

    let err = h.loader.import("bad.js", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Load);
    assert!(err.to_string().contains("Integrity check failed"));
    assert_eq!(h.fixtures.runs(&url("bad.js")), 0);
}

/// Adds the `base` export of `./env.js` to every export it reports.
#[derive(Default)]
struct FakeRuntime {
    seen_imports: Mutex<Vec<String>>,
}

impl WasmRuntime for FakeRuntime {
    fn instantiate(
        &self,
        _key: &ModuleKey,
        bytes: &[u8],
        imports: &BTreeMap<String, Namespace>,
    ) -> anyhow::Result<Vec<(String, Value)>> {
        anyhow::ensure!(wasm::is_wasm(bytes), "not a wasm binary");
        self.seen_imports.lock().extend(imports.keys().cloned());
        let base = imports
            .get("./env.js")
            .and_then(|env| env.get("base"))
            .and_then(|base| base.as_number())
            .unwrap_or_default();
        Ok(vec![("answer".to_string(), Value::Number(base + 2.0))])
    }
}

/// Header, version and an import section naming `modules`.
fn wasm_importing(modules: &[&str]) -> Vec<u8> {
    let mut section = vec![modules.len() as u8];
    for module in modules {
        section.push(module.len() as u8);
        section.extend_from_slice(module.as_bytes());
        section.extend_from_slice(&[1, b'f', 0x00, 0x00]);
    }
    let mut bytes = wasm::MAGIC.to_vec();
    bytes.extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x02, section.len() as u8]);
    bytes.extend_from_slice(&section);
    bytes
}

fn wasm_harness(runtime: Arc<FakeRuntime>) -> Harness {
    let transport = Arc::new(MemoryTransport::new());
    let fixtures = Fixtures::new();
    let loader = Loader::builder()
        .config(config())
        .transport(transport.clone())
        .evaluator(fixtures.clone())
        .wasm_runtime(runtime)
        .build()
        .unwrap();
    Harness {
        loader,
        transport,
        fixtures,
    }
}

#[tokio::test]
async fn test_wasm_imports_become_dependencies() {
    let runtime = Arc::new(FakeRuntime::default());
    let h = wasm_harness(runtime.clone());
    h.loader
        .register("env.js", vec![], |exporter, _| {
            exporter.export("base", 40);
            Ok(Declaration::new())
        })
        .unwrap();
    h.transport.insert(url("math.wasm"), wasm_importing(&["./env.js"]));

    let ns = h.loader.import_namespace("math.wasm", None).await.unwrap();
    assert_eq!(ns.get("answer"), Some(Value::Number(42.0)));
    assert_eq!(*runtime.seen_imports.lock(), vec!["./env.js".to_string()]);
}

#[tokio::test]
async fn test_malformed_wasm_is_load_error() {
    let h = wasm_harness(Arc::new(FakeRuntime::default()));
    let mut bytes = wasm::MAGIC.to_vec();
    bytes.extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x02, 0x05, 0x01]);
    h.transport.insert(url("broken.wasm"), bytes);

    let err = h.loader.import("broken.wasm", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Load);
    assert!(err.to_string().contains("Malformed WebAssembly module"));
}

#[tokio::test]
async fn test_wasm_without_runtime_is_load_error() {
    let h = Harness::new();
    h.transport.insert(url("math.wasm"), wasm_importing(&[]));

    let err = h.loader.import("math.wasm", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Load);
    assert!(err.to_string().contains("No WebAssembly runtime"));
}
