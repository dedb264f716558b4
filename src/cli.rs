// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Command line arguments.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// spacey-system - resolve, trace and inspect module graphs
#[derive(Parser, Debug)]
#[command(name = "spacey-system")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Loader configuration file (JSON)
    #[arg(short, long, global = true, env = "SPACEY_LOADER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Base URL specifiers resolve against (defaults to the working directory)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Fetch without the on-disk module cache
    #[arg(long, global = true)]
    pub no_cache: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve specifiers to module keys
    Resolve(ResolveArgs),

    /// Load a module graph without executing it and print its dependencies
    Trace(TraceArgs),

    /// Detect the module format of source files
    Detect(DetectArgs),

    /// Manage the module cache
    Cache(CacheArgs),

    /// Start an interactive session
    Repl,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Specifiers to resolve
    #[arg(required = true)]
    pub specifiers: Vec<String>,

    /// Key of the importing module
    #[arg(short, long)]
    pub parent: Option<String>,
}

#[derive(Args, Debug)]
pub struct TraceArgs {
    /// Entry specifier
    pub specifier: String,

    /// Print the trace records as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct DetectArgs {
    /// Source files
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Remove every cached module
    #[command(alias = "clean")]
    Clear,
    /// Show the number and total size of cached modules
    Info,
    /// Print the cache directory
    Path,
}
