// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Graph linking.
//!
//! Linking a record instantiates its direct dependencies in parallel, wires
//! the declarative setters to each dependency and stores the resulting
//! instantiations on the link record. [`deep_instantiate`] repeats this
//! over the whole graph, visiting every record once, so cycles terminate.

use crate::error::{LoaderError, Result, Stage};
use crate::key::ModuleKey;
use crate::loader::Loader;
use crate::record::{Instantiation, LoadRecord, LoadState, ModuleBody};
use crate::trace::LoadTrace;
use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// Link every record reachable from `root`.
pub(crate) async fn deep_instantiate(loader: &Loader, root: Arc<LoadRecord>) -> Result<()> {
    let mut seen: HashSet<ModuleKey> = HashSet::new();
    seen.insert(root.key().clone());

    let mut pending = FuturesUnordered::new();
    pending.push(link_dependencies(loader.clone(), root));

    while let Some(children) = pending.next().await {
        for child in children? {
            if seen.insert(child.key().clone()) {
                pending.push(link_dependencies(loader.clone(), child));
            }
        }
    }
    trace!(records = seen.len(), "graph linked");
    Ok(())
}

/// Link `record` once and return its dependencies that are still linking.
fn link_dependencies(
    loader: Loader,
    record: Arc<LoadRecord>,
) -> BoxFuture<'static, Result<Vec<Arc<LoadRecord>>>> {
    async move {
        let link = match record.state() {
            LoadState::Linking(link) => link,
            LoadState::Evaluated(_) => return Ok(Vec::new()),
            LoadState::LoadFailed(err) | LoadState::EvalFailed(err) => return Err(err),
        };

        let pending = record.clone();
        link.memoize_link(move || instantiate_deps(loader, pending).boxed().shared())
            .await?;

        Ok(link
            .instantiations()
            .into_iter()
            .filter_map(|instantiation| match instantiation {
                Instantiation::Record(dep) => Some(dep),
                Instantiation::Namespace(_) => None,
            })
            .collect())
    }
    .boxed()
}

/// Instantiate the direct dependencies of `record`. A failure is cached on
/// the record.
async fn instantiate_deps(loader: Loader, record: Arc<LoadRecord>) -> Result<()> {
    match link_record(&loader, &record).await {
        Ok(()) => Ok(()),
        Err(err) => {
            let err = err.with_stage(Stage::Loading, record.key(), None);
            debug!(key = %record.key(), "link failed: {err}");
            record.set_state(LoadState::LoadFailed(err.clone()));
            Err(err)
        }
    }
}

async fn link_record(loader: &Loader, record: &Arc<LoadRecord>) -> Result<()> {
    let key = record.key();
    let link = record
        .link()
        .ok_or_else(|| LoaderError::shape(format!("Module {key} is no longer linking")))?;
    let dependencies = link
        .linked()
        .map(|linked| linked.dependencies.clone())
        .ok_or_else(|| LoaderError::shape(format!("Module {key} was never instantiated")))?;

    let resolved = try_join_all(
        dependencies
            .iter()
            .map(|dep| loader.resolve_instantiate(dep.clone(), key.clone())),
    )
    .await?;

    if let Some(ModuleBody::Declarative { setters, .. }) =
        link.linked().map(|linked| &linked.body)
    {
        for ((_, instantiation), setter) in resolved.iter().zip(setters) {
            let Some(setter) = setter else { continue };
            match instantiation {
                Instantiation::Namespace(namespace) => setter(namespace),
                Instantiation::Record(dep) => match dep.state() {
                    LoadState::Evaluated(namespace) => setter(&namespace),
                    LoadState::Linking(dep_link) => {
                        dep.add_importer(setter.clone());
                        setter(&dep_link.snapshot());
                    }
                    LoadState::LoadFailed(err) | LoadState::EvalFailed(err) => return Err(err),
                },
            }
        }
    }

    if loader.inner.config.trace {
        let mut entry = loader
            .inner
            .traces
            .entry(key.clone())
            .or_insert_with(|| LoadTrace::new(key.as_str()));
        for (dep, (dep_key, _)) in dependencies.iter().zip(&resolved) {
            entry.dep_map.insert(dep.clone(), dep_key.to_string());
        }
    }

    link.set_instantiations(resolved.into_iter().map(|(_, instantiation)| instantiation).collect());
    Ok(())
}
