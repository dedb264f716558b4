// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! `trace` command.

use crate::cli::{Cli, TraceArgs};
use crate::commands::CommandContext;
use anyhow::Result;
use owo_colors::OwoColorize;
use spacey_loader::{LoadTrace, Loader};
use std::collections::{BTreeMap, HashSet};

pub async fn run(args: &TraceArgs, cli: &Cli) -> Result<()> {
    let ctx = CommandContext::new(cli)?;
    let loader = ctx.tracing_loader()?;
    let (root, traces) = trace_graph(&loader, &args.specifier).await?;

    if args.json {
        let records: Vec<&LoadTrace> = traces.values().collect();
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        print!("{}", render_tree(&root, &traces));
        println!();
        println!("{} {}", traces.len().to_string().bold(), "modules".dimmed());
    }
    Ok(())
}

/// Load the graph of `specifier` and collect the trace of every module in it.
pub async fn trace_graph(
    loader: &Loader,
    specifier: &str,
) -> Result<(String, BTreeMap<String, LoadTrace>)> {
    let root = loader.load(specifier, None).await?;
    let traces = loader
        .traces()
        .into_iter()
        .map(|trace| (trace.key.clone(), trace))
        .collect();
    Ok((root.to_string(), traces))
}

/// Dependency tree below `root`. Modules already printed are marked instead
/// of expanded again.
pub fn render_tree(root: &str, traces: &BTreeMap<String, LoadTrace>) -> String {
    let mut out = String::new();
    let mut seen = HashSet::new();
    out.push_str(&describe(root, traces));
    out.push('\n');
    seen.insert(root.to_string());
    render_children(root, traces, "", &mut seen, &mut out);
    out
}

fn render_children(
    key: &str,
    traces: &BTreeMap<String, LoadTrace>,
    prefix: &str,
    seen: &mut HashSet<String>,
    out: &mut String,
) {
    let Some(trace) = traces.get(key) else { return };
    let children = trace.resolved_dependencies();

    for (index, child) in children.iter().enumerate() {
        let last = index + 1 == children.len();
        let branch = if last { "└── " } else { "├── " };
        let expanded = seen.insert(child.to_string());

        out.push_str(prefix);
        out.push_str(&branch.dimmed().to_string());
        out.push_str(&describe(child, traces));
        if !expanded {
            out.push_str(&format!(" {}", "(seen)".dimmed()));
        }
        out.push('\n');

        if expanded {
            let nested = format!("{prefix}{}", if last { "    " } else { "│   " });
            render_children(child, traces, &nested, seen, out);
        }
    }
}

fn describe(key: &str, traces: &BTreeMap<String, LoadTrace>) -> String {
    match traces.get(key).and_then(|trace| trace.format) {
        Some(format) => format!("{} {}", key.cyan(), format!("[{format}]").dimmed()),
        None => key.cyan().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::StaticScan;
    use spacey_loader::LoaderConfig;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_trace_graph_from_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("app.js"),
            "System.register(['./lib.js', './util.js'], function () {});",
        )
        .unwrap();
        std::fs::write(dir.path().join("lib.js"), "var util = require('./util.js');").unwrap();
        std::fs::write(
            dir.path().join("util.js"),
            "define([], function () { return 1; });",
        )
        .unwrap();

        let base_url = format!("file://{}/", dir.path().display());
        let loader = Loader::builder()
            .config(LoaderConfig {
                base_url: base_url.clone(),
                trace: true,
                ..Default::default()
            })
            .evaluator(Arc::new(StaticScan))
            .build()
            .unwrap();

        let (root, traces) = trace_graph(&loader, "./app.js").await.unwrap();
        assert_eq!(root, format!("{base_url}app.js"));
        assert_eq!(traces.len(), 3);
        assert_eq!(
            traces[&root].resolved_dependencies(),
            vec![format!("{base_url}lib.js"), format!("{base_url}util.js")]
        );

        let tree = render_tree(&root, &traces);
        assert_eq!(tree.lines().count(), 4);
        assert!(tree.contains("(seen)"));
    }
}
