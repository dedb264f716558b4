// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! spacey-system - command line front end for the spacey module loader
//!
//! ## Commands
//!
//! - `resolve <spec>...` prints the key each specifier resolves to
//! - `trace <spec>` loads a module graph without executing it and prints
//!   the dependency tree (or the trace records with `--json`)
//! - `detect <file>...` reports the detected module format
//! - `cache clear|info|path` manages the on-disk module cache
//! - `repl` (the default) starts an interactive session

mod cli;
mod commands;
mod repl;
mod scan;

use clap::Parser;
use cli::{Cli, Commands};
use commands::CommandContext;
use owo_colors::OwoColorize;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Some(Commands::Resolve(args)) => commands::resolve::run(args, &cli).await,
        Some(Commands::Trace(args)) => commands::trace::run(args, &cli).await,
        Some(Commands::Detect(args)) => commands::detect::run(args, &cli).await,
        Some(Commands::Cache(args)) => commands::cache::run(args, &cli).await,
        Some(Commands::Repl) | None => run_repl(&cli).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}: {err:#}", "Error".red().bold());
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins; otherwise warnings, or debug output for the loader with
/// `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "spacey_loader=debug,spacey_system=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Run the interactive session on a blocking thread so it can drive the
/// runtime for each command.
async fn run_repl(cli: &Cli) -> anyhow::Result<()> {
    let ctx = CommandContext::new(cli)?;
    let loader = ctx.tracing_loader()?;
    let handle = tokio::runtime::Handle::current();

    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut repl = repl::Repl::new(loader, handle)?;
        repl.run()?;
        Ok(())
    })
    .await?
}
