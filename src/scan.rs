// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! A script evaluator that reads dependency lists without running code.
//!
//! `System.register` and `define` calls are located in the masked source and
//! their literal name and dependency arguments are read back out of the
//! original text. CommonJS and global scripts need nothing beyond what the
//! loader already scans, so their bodies are skipped. The modules this
//! produces have no exports; they are only good for tracing.

use spacey_loader::source::{MaskedSource, mask, read_string_array, read_string_literal};
use spacey_loader::{
    AmdScope, CommonJsScope, Declaration, GlobalScope, ModuleKey, RegisterContext, ScriptEvaluator,
};

/// Static dependency scanner.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticScan;

/// One `System.register`/`registerDynamic`/`define` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedCall {
    pub name: Option<String>,
    pub deps: Vec<String>,
    pub dynamic: bool,
}

impl ScriptEvaluator for StaticScan {
    fn eval_register(
        &self,
        source: &str,
        key: &ModuleKey,
        ctx: &mut RegisterContext,
    ) -> anyhow::Result<()> {
        let calls = register_calls(source);
        if calls.is_empty() {
            anyhow::bail!("no System.register call found in {key}");
        }
        for call in calls {
            match (call.name, call.dynamic) {
                (Some(name), false) => {
                    ctx.register_named(name, call.deps, |_, _| Ok(Declaration::new()))
                }
                (None, false) => ctx.register(call.deps, |_, _| Ok(Declaration::new())),
                (Some(name), true) => {
                    ctx.register_dynamic_named(name, call.deps, false, |_, _| Ok(()))
                }
                (None, true) => ctx.register_dynamic(call.deps, false, |_, _| Ok(())),
            }
        }
        Ok(())
    }

    fn eval_commonjs(&self, _source: &str, _scope: &CommonJsScope<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn eval_amd(&self, source: &str, _key: &ModuleKey, scope: &mut AmdScope) -> anyhow::Result<()> {
        for call in define_calls(source) {
            match call.name {
                Some(name) => scope.define_named(name, call.deps, |_| Ok(None)),
                None => scope.define(call.deps, |_| Ok(None)),
            }
        }
        Ok(())
    }

    fn eval_global(&self, _source: &str, _scope: &GlobalScope<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// `System.register(...)` and `System.registerDynamic(...)` calls.
pub fn register_calls(source: &str) -> Vec<ScannedCall> {
    let masked = mask(source);
    let text = masked.as_str();
    let mut calls = Vec::new();

    for (start, matched) in text.match_indices("System.register") {
        let mut i = start + matched.len();
        let dynamic = text[i..].starts_with("Dynamic");
        if dynamic {
            i += "Dynamic".len();
        }
        let Some(open) = call_paren(text, i) else { continue };
        let (name, deps) = call_arguments(source, &masked, open + 1);
        calls.push(ScannedCall { name, deps, dynamic });
    }
    calls
}

/// AMD `define(...)` calls.
pub fn define_calls(source: &str) -> Vec<ScannedCall> {
    let masked = mask(source);
    let text = masked.as_str();
    let mut calls = Vec::new();

    for (start, matched) in text.match_indices("define") {
        let preceded_by_word = text[..start]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '.'));
        if preceded_by_word {
            continue;
        }
        let Some(open) = call_paren(text, start + matched.len()) else { continue };
        let (name, deps) = call_arguments(source, &masked, open + 1);
        calls.push(ScannedCall {
            name,
            deps,
            dynamic: false,
        });
    }
    calls
}

/// Offset of the `(` following `offset`, allowing whitespace in between.
fn call_paren(text: &str, offset: usize) -> Option<usize> {
    let open = skip_whitespace(text, offset);
    (text.as_bytes().get(open) == Some(&b'(')).then_some(open)
}

/// Leading `'name',` and `[deps]` arguments of a call.
fn call_arguments(
    source: &str,
    masked: &MaskedSource,
    offset: usize,
) -> (Option<String>, Vec<String>) {
    let text = masked.as_str();
    let mut i = skip_whitespace(text, offset);

    let mut name = None;
    if masked.string_at(i).is_some() {
        if let Some((literal, end)) = read_string_literal(source, i) {
            let after = skip_whitespace(text, end);
            if text.as_bytes().get(after) == Some(&b',') {
                name = Some(literal);
                i = skip_whitespace(text, after + 1);
            }
        }
    }

    let deps = read_string_array(source, i)
        .map(|(deps, _)| deps)
        .unwrap_or_default();
    (name, deps)
}

fn skip_whitespace(text: &str, mut offset: usize) -> usize {
    let bytes = text.as_bytes();
    while bytes.get(offset).is_some_and(u8::is_ascii_whitespace) {
        offset += 1;
    }
    offset
}
