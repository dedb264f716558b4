// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Source formats, transpilation and loader plugins.

mod common;

use async_trait::async_trait;
use common::{Harness, REGISTER_SOURCE, config, config_from_json, url};
use spacey_loader::{
    Declaration, ErrorKind, Format, LoaderConfig, LoaderPlugin, Object, PluginRequest, Value,
};
use std::sync::Arc;

/// Registers `dep.js` exporting `n = 5`.
fn serve_dep(h: &Harness) {
    h.serve("dep.js", REGISTER_SOURCE);
    h.fixtures.on_register(&url("dep.js"), |ctx| {
        ctx.register(vec![], |exporter, _| {
            exporter.export("n", 5);
            Ok(Declaration::new())
        })
    });
}

fn traced() -> LoaderConfig {
    LoaderConfig {
        trace: true,
        ..config()
    }
}

#[tokio::test]
async fn test_commonjs_detected_with_require_deps() {
    let h = Harness::with_config(traced());
    serve_dep(&h);
    h.serve(
        "main.js",
        "var dep = require('./dep.js');\nmodule.exports = { value: dep.n };",
    );
    h.fixtures.on_commonjs(&url("main.js"), |scope| {
        assert_eq!(scope.filename, url("main.js"));
        assert_eq!(scope.dirname, "http://app.test");
        let dep = scope.require("./dep.js")?;
        let exports = Object::new();
        exports.set("value", dep.get("n").unwrap_or_default());
        scope.set_exports(exports);
        Ok(())
    });

    let exports = h.loader.import("main.js", None).await.unwrap();
    assert_eq!(exports.get("value"), Some(Value::Number(5.0)));

    let trace = h.loader.trace(&url("main.js")).unwrap();
    assert_eq!(trace.format, Some(Format::Cjs));
    assert_eq!(trace.dependencies, vec!["./dep.js".to_string()]);
    assert_eq!(trace.resolved_dependencies(), vec![url("dep.js").as_str()]);
}

#[tokio::test]
async fn test_commonjs_es_module_exports_are_lifted() {
    let h = Harness::new();
    h.serve(
        "interop.js",
        "exports.__esModule = true; exports.named = 1; exports.default = 'd';",
    );
    h.fixtures.on_commonjs(&url("interop.js"), |scope| {
        let exports = scope.exports();
        let Value::Object(exports) = exports else {
            anyhow::bail!("exports is not an object");
        };
        exports.set("__esModule", true);
        exports.set("named", 1);
        exports.set("default", "d");
        Ok(())
    });

    let ns = h.loader.import_namespace("interop.js", None).await.unwrap();
    assert_eq!(ns.get("named"), Some(Value::Number(1.0)));
    assert_eq!(ns.get("default"), Some(Value::from("d")));
}

/// Sets `exports.named = 1` without any `__esModule` marker.
fn serve_plain_commonjs(h: &Harness, path: &str, source: &str) {
    h.serve(path, source);
    h.fixtures.on_commonjs(&url(path), |scope| {
        let Value::Object(exports) = scope.exports() else {
            anyhow::bail!("exports is not an object");
        };
        exports.set("named", 1);
        Ok(())
    });
}

#[tokio::test]
async fn test_es_module_meta_lifts_plain_exports() {
    let h = Harness::with_config(config_from_json(
        r#"{ "meta": { "lib.js": { "esModule": true, "format": "cjs" } } }"#,
    ));
    serve_plain_commonjs(&h, "lib.js", "exports.named = 1;");
    serve_plain_commonjs(&h, "plain.js", "exports.named = 1;");

    let ns = h.loader.import_namespace("lib.js", None).await.unwrap();
    assert!(ns.has("named"));
    assert_eq!(ns.get("named"), Some(Value::Number(1.0)));

    let plain = h.loader.import_namespace("plain.js", None).await.unwrap();
    assert!(!plain.has("named"));
}

#[tokio::test]
async fn test_es_module_directive_lifts_plain_exports() {
    let h = Harness::new();
    serve_plain_commonjs(&h, "flagged.js", "'esModule';\n'format cjs';\nexports.named = 1;");

    let ns = h.loader.import_namespace("flagged.js", None).await.unwrap();
    assert_eq!(ns.get("named"), Some(Value::Number(1.0)));
}

#[tokio::test]
async fn test_require_detection_can_be_disabled() {
    let h = Harness::with_config(config_from_json(
        r#"{ "meta": { "nodetect.js": { "cjsRequireDetection": false } } }"#,
    ));
    serve_dep(&h);
    h.serve("nodetect.js", "module.exports = require('./dep.js');");
    h.fixtures.on_commonjs(&url("nodetect.js"), |scope| {
        scope.set_exports(scope.require("./dep.js")?);
        Ok(())
    });

    let err = h.loader.import("nodetect.js", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Eval);
    assert!(err.to_string().contains("not declared as a dependency"));
    assert_eq!(h.fetches("dep.js"), 0);
}

#[tokio::test]
async fn test_amd_define_with_pseudo_deps() {
    let h = Harness::new();
    serve_dep(&h);
    h.serve(
        "amd.js",
        "define(['./dep.js', 'exports'], function (dep, exports) { exports.v = dep.n; });",
    );
    h.fixtures.on_amd(&url("amd.js"), |scope| {
        scope.define(vec!["./dep.js".into(), "exports".into()], |args| {
            let dep = &args.values[0];
            if let Value::Object(exports) = &args.values[1] {
                exports.set("v", dep.get("n").unwrap_or_default());
            }
            Ok(None)
        })
    });

    let exports = h.loader.import("amd.js", None).await.unwrap();
    assert_eq!(exports.get("v"), Some(Value::Number(5.0)));
}

#[tokio::test]
async fn test_amd_factory_return_replaces_exports() {
    let h = Harness::new();
    h.serve("value.js", "define(function () { return 7; });");
    h.fixtures.on_amd(&url("value.js"), |scope| {
        scope.define(vec![], |_| Ok(Some(Value::from(7))))
    });

    assert_eq!(h.loader.import("value.js", None).await.unwrap(), Value::Number(7.0));
}

#[tokio::test]
async fn test_global_script_exports_new_global() {
    let h = Harness::new();
    h.serve("jq.js", "window.jQuery = function () {};");
    h.fixtures.on_global(&url("jq.js"), |scope| {
        scope.globals.set("jQuery", "jq");
        Ok(())
    });

    assert_eq!(h.loader.import("jq.js", None).await.unwrap(), Value::from("jq"));
    assert_eq!(h.loader.global_object().get("jQuery"), Some(Value::from("jq")));
}

#[tokio::test]
async fn test_global_script_with_injected_globals() {
    let h = Harness::with_config(config_from_json(
        r#"{ "meta": { "plugin.js": { "globals": { "$": "./jq.js" }, "exports": "plugin" } } }"#,
    ));
    h.serve("jq.js", "window.jQuery = function () {};");
    h.fixtures.on_global(&url("jq.js"), |scope| {
        scope.globals.set("jQuery", "jq");
        Ok(())
    });
    h.serve("plugin.js", "window.plugin = { wraps: $ };");
    h.fixtures.on_global(&url("plugin.js"), |scope| {
        let plugin = Object::new();
        plugin.set("wraps", scope.globals.get("$").unwrap_or_default());
        scope.globals.set("plugin", plugin);
        Ok(())
    });

    let exports = h.loader.import("plugin.js", None).await.unwrap();
    assert_eq!(exports.get("wraps"), Some(Value::from("jq")));
    assert!(!h.loader.global_object().has("$"));
}

#[tokio::test]
async fn test_format_directive_overrides_detection() {
    let h = Harness::with_config(traced());
    h.serve("forced.js", "'format global';\nexports.x = 1;");
    h.fixtures.on_global(&url("forced.js"), |scope| {
        scope.globals.set("forced", 1);
        Ok(())
    });

    h.loader.import("forced.js", None).await.unwrap();
    assert_eq!(h.loader.trace(&url("forced.js")).unwrap().format, Some(Format::Global));
}

#[tokio::test]
async fn test_esm_without_transpiler_fails() {
    let h = Harness::new();
    h.serve("modern.js", "export default 1;");

    let err = h.loader.import("modern.js", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Load);
    assert!(err.to_string().contains("transpiler"));
}

/// Rewrites ES module sources into register format.
struct Transpiler;

#[async_trait]
impl LoaderPlugin for Transpiler {
    async fn translate(&self, request: &mut PluginRequest) -> spacey_loader::Result<()> {
        let source = request.source.take().unwrap_or_default();
        request.source = Some(format!("System.register([], function () {{}}); /* {source} */"));
        Ok(())
    }
}

#[tokio::test]
async fn test_esm_goes_through_transpiler() {
    let h = Harness::with_config(LoaderConfig {
        transpiler: Some("transpiler.js".into()),
        trace: true,
        ..config()
    });
    h.loader
        .register_dynamic("transpiler.js", vec![], true, |_, module| {
            module.set_exports(Value::Plugin(Arc::new(Transpiler)));
            Ok(())
        })
        .unwrap();
    h.serve("modern.js", "export const answer = 42;");
    h.fixtures.on_register(&url("modern.js"), |ctx| {
        ctx.register(vec![], |exporter, _| {
            exporter.export("answer", 42);
            Ok(Declaration::new())
        })
    });

    let ns = h.loader.import_namespace("modern.js", None).await.unwrap();
    assert_eq!(ns.get("answer"), Some(Value::Number(42.0)));
    assert_eq!(h.loader.trace(&url("modern.js")).unwrap().format, Some(Format::Register));
}

/// Turns stylesheet text into a string export.
struct Css;

#[async_trait]
impl LoaderPlugin for Css {
    async fn instantiate(&self, request: &PluginRequest) -> spacey_loader::Result<Option<Value>> {
        let source = request.source.clone().unwrap_or_default();
        Ok(Some(Value::from(format!("css:{source}"))))
    }
}

#[tokio::test]
async fn test_plugin_instantiate_supplies_exports() {
    let h = Harness::new();
    h.loader
        .register_dynamic("css.js", vec![], true, |_, module| {
            module.set_exports(Value::Plugin(Arc::new(Css)));
            Ok(())
        })
        .unwrap();
    h.serve("style.css", "body {}");

    let key = h.loader.resolve("./style.css!css.js", None).await.unwrap();
    assert_eq!(key, format!("{}!{}", url("style.css"), url("css.js")).as_str());

    let exports = h.loader.import("./style.css!css.js", None).await.unwrap();
    assert_eq!(exports, Value::from("css:body {}"));
    assert_eq!(h.fetches("style.css"), 1);
}

#[tokio::test]
async fn test_non_plugin_loader_is_shape_error() {
    let h = Harness::new();
    h.loader
        .register("notplugin.js", vec![], |exporter, _| {
            exporter.export("x", 1);
            Ok(Declaration::new())
        })
        .unwrap();
    h.serve("a.txt", "hello");

    let err = h.loader.import("./a.txt!notplugin.js", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Shape);
}
