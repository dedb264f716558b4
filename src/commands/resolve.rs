// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! `resolve` command.

use crate::cli::{Cli, ResolveArgs};
use crate::commands::CommandContext;
use anyhow::Result;
use owo_colors::OwoColorize;

pub async fn run(args: &ResolveArgs, cli: &Cli) -> Result<()> {
    let ctx = CommandContext::new(cli)?;
    let loader = ctx.loader()?;

    let mut failed = 0;
    for specifier in &args.specifiers {
        match loader.resolve(specifier, args.parent.as_deref()).await {
            Ok(key) => println!("{} {} {}", specifier.cyan(), "->".dimmed(), key),
            Err(err) => {
                failed += 1;
                eprintln!("{} {}: {err}", "✗".red(), specifier.cyan());
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} specifiers failed to resolve", args.specifiers.len());
    }
    Ok(())
}
