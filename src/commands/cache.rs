// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! `cache` command.

use crate::cli::{CacheAction, CacheArgs, Cli};
use crate::commands::{CommandContext, format_bytes};
use anyhow::Result;
use owo_colors::OwoColorize;
use spacey_loader::transport::{CachingTransport, SchemeTransport};
use std::sync::Arc;

pub async fn run(args: &CacheArgs, cli: &Cli) -> Result<()> {
    let ctx = CommandContext::new(cli)?;
    let cache = CachingTransport::new(Arc::new(SchemeTransport::new()), ctx.config.cache.clone())?;

    match &args.action {
        CacheAction::Clear => {
            cache.clear().await?;
            println!("{}", "Cache cleared".green());
        }
        CacheAction::Info => {
            let entries = cache.len().await?;
            let size = cache.size().await?;
            println!("{} {}", "Location:".bold(), cache.cache_dir().display());
            println!("{} {entries}", "Entries:".bold());
            println!("{} {}", "Size:".bold(), format_bytes(size));
        }
        CacheAction::Path => {
            println!("{}", cache.cache_dir().display());
        }
    }

    Ok(())
}
