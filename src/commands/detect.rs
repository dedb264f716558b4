// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! `detect` command.

use crate::cli::{Cli, DetectArgs};
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use spacey_loader::source::{self, MetaDirective};
use spacey_loader::wasm;
use std::path::Path;

pub async fn run(args: &DetectArgs, _cli: &Cli) -> Result<()> {
    for path in &args.files {
        println!("{}", describe(path).await?);
    }
    Ok(())
}

/// One line naming the format of `path` and what the prologue declares.
pub async fn describe(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Unable to read {}", path.display()))?;

    if wasm::is_wasm(&bytes) {
        let imports = wasm::import_modules(&bytes)
            .map_err(|reason| anyhow::anyhow!("{}: {reason}", path.display()))?;
        return Ok(format!(
            "{} {} {}",
            path.display(),
            "wasm".magenta().bold(),
            format!("imports {}", imports.join(", ")).dimmed()
        ));
    }

    let text = String::from_utf8_lossy(&bytes);
    let detection = source::detect(&text);
    let mut notes = Vec::new();
    if detection.bundle {
        notes.push("bundle".to_string());
    }
    for directive in &detection.prologue.directives {
        match directive {
            MetaDirective::Format(format) => notes.push(format!("format {format}")),
            MetaDirective::Deps(dep) => notes.push(format!("deps {dep}")),
            _ => {}
        }
    }

    let mut line = format!("{} {}", path.display(), detection.format.to_string().green().bold());
    if !notes.is_empty() {
        line.push_str(&format!(" {}", format!("({})", notes.join(", ")).dimmed()));
    }
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_describe_reports_format() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "'format amd';\nmodule.exports = 1;").unwrap();

        let line = describe(file.path()).await.unwrap();
        assert!(line.contains("format amd"));
    }

    #[tokio::test]
    async fn test_describe_missing_file() {
        assert!(describe(Path::new("/nonexistent/spacey/file.js")).await.is_err());
    }
}
