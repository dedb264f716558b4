// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Subcommand implementations.

pub mod cache;
pub mod detect;
pub mod resolve;
pub mod trace;

use crate::cli::Cli;
use crate::scan::StaticScan;
use anyhow::Result;
use spacey_loader::{Loader, LoaderConfig};
use std::sync::Arc;
use tracing::debug;

/// Configuration shared by every command.
pub struct CommandContext {
    pub config: LoaderConfig,
}

impl CommandContext {
    /// Read the configuration file (if any), environment overrides and
    /// command line flags, in that order.
    pub fn new(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => LoaderConfig::load(path)?,
            None => {
                let mut config = LoaderConfig::default();
                config.load_from_env();
                config
            }
        };

        if let Some(base_url) = &cli.base_url {
            config.set("base-url", base_url);
        }
        if cli.no_cache {
            config.cache = None;
        }
        config.validate()?;

        debug!(base_url = %config.base_url, "configuration loaded");
        Ok(Self { config })
    }

    /// A loader that scans sources instead of executing them.
    pub fn loader(&self) -> Result<Loader> {
        let loader = Loader::builder()
            .config(self.config.clone())
            .evaluator(Arc::new(StaticScan))
            .build()?;
        Ok(loader)
    }

    /// Like [`CommandContext::loader`], recording load traces.
    pub fn tracing_loader(&self) -> Result<Loader> {
        let mut config = self.config.clone();
        config.trace = true;
        let loader = Loader::builder()
            .config(config)
            .evaluator(Arc::new(StaticScan))
            .build()?;
        Ok(loader)
    }
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
