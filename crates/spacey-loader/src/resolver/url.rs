// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! URL-level resolution: relative joins, map and paths matching.
//!
//! Joins are done segment-wise on the raw string rather than through a URL
//! parser so that plain (scheme-less) parents and non-hierarchical keys keep
//! their exact spelling.

use super::Rules;
use crate::error::{LoaderError, Result};
use std::collections::BTreeMap;

fn resolve_error(specifier: &str, parent: Option<&str>) -> LoaderError {
    match parent {
        Some(parent) => {
            LoaderError::resolution(format!("Unable to resolve {specifier} to {parent}"))
        }
        None => LoaderError::resolution(format!("Unable to resolve {specifier}")),
    }
}

/// Resolve a URL-like specifier against `parent`.
///
/// Returns `Ok(None)` for plain specifiers (`lodash`, `pkg/sub`), which go
/// through map/paths/package resolution instead.
pub fn resolve_if_not_plain(specifier: &str, parent: Option<&str>) -> Result<Option<String>> {
    let specifier = specifier.trim();
    let bytes = specifier.as_bytes();
    let protocol = parent.and_then(|p| p.find(':').map(|i| &p[..=i]));

    // Protocol-relative
    if specifier.starts_with("//") {
        let protocol = protocol.ok_or_else(|| resolve_error(specifier, parent))?;
        return Ok(Some(format!("{protocol}{specifier}")));
    }

    let relative = match bytes {
        [b'.'] | [b'.', b'.'] => true,
        [b'.', b'/', ..] | [b'.', b'.', b'/', ..] => true,
        [b'/', ..] => true,
        _ => false,
    };

    if relative {
        let parent = parent.ok_or_else(|| resolve_error(specifier, None))?;
        return join(specifier, parent, protocol).map(Some);
    }

    if specifier.contains(':') {
        // Windows drive paths
        if bytes.len() > 2
            && bytes[1] == b':'
            && bytes[2] == b'\\'
            && bytes[0].is_ascii_alphabetic()
        {
            return Ok(Some(format!("file:///{}", specifier.replace('\\', "/"))));
        }
        return Ok(Some(specifier.to_string()));
    }

    Ok(None)
}

/// Whether `specifier` needs map/paths resolution.
pub fn is_plain(specifier: &str) -> bool {
    matches!(resolve_if_not_plain(specifier, Some("plain:/")), Ok(None))
}

fn join(specifier: &str, parent: &str, protocol: Option<&str>) -> Result<String> {
    let mut specifier = specifier.to_string();
    if specifier == "." || specifier == ".." {
        specifier.push('/');
    }

    let parent_is_plain = match protocol {
        None => true,
        Some(protocol) => parent.as_bytes().get(protocol.len()) != Some(&b'/'),
    };

    // Index in `parent` where the path portion begins
    let (prefix_end, pathname) = if parent_is_plain {
        (0, parent.to_string())
    } else {
        let protocol_len = protocol.map_or(0, str::len);
        if parent.as_bytes().get(protocol_len + 1) == Some(&b'/') {
            if protocol == Some("file:") {
                let start = (protocol_len + 3).min(parent.len());
                (start, parent[start..].to_string())
            } else {
                // scheme://authority/path
                let authority_start = protocol_len + 2;
                match parent[authority_start..].find('/') {
                    Some(offset) => {
                        let start = authority_start + offset + 1;
                        (start, parent[start..].to_string())
                    }
                    // No path at all: treat as a trailing `/`
                    None => (parent.len() + 1, String::new()),
                }
            }
        } else {
            let start = protocol_len + 1;
            (start, parent[start..].to_string())
        }
    };

    let origin = if prefix_end > parent.len() {
        format!("{parent}/")
    } else {
        parent[..prefix_end].to_string()
    };

    if specifier.starts_with('/') {
        if parent_is_plain {
            return Err(resolve_error(&specifier, Some(parent)));
        }
        let root = origin.strip_suffix('/').unwrap_or(&origin);
        return Ok(format!("{root}{specifier}"));
    }

    let directory = match pathname.rfind('/') {
        Some(i) => &pathname[..=i],
        None => "",
    };
    let segmented = format!("{directory}{specifier}");
    let bytes = segmented.as_bytes();
    let mut output: Vec<&str> = Vec::new();
    let mut segment_start: Option<usize> = None;
    let mut i = 0;

    while i < bytes.len() {
        if let Some(start) = segment_start {
            if bytes[i] == b'/' {
                output.push(&segmented[start..=i]);
                segment_start = None;
            }
            i += 1;
            continue;
        }

        if bytes[i] == b'.' {
            let next = bytes.get(i + 1).copied();
            if next == Some(b'.') && (bytes.get(i + 2) == Some(&b'/') || i + 2 == bytes.len()) {
                output.pop();
                i += 3;
            } else if next == Some(b'/') || i + 1 == bytes.len() {
                i += 2;
            } else {
                segment_start = Some(i);
                i += 1;
                continue;
            }
            // Backtracking out of a plain parent
            if parent_is_plain && output.is_empty() {
                return Err(resolve_error(&specifier, Some(parent)));
            }
            continue;
        }

        segment_start = Some(i);
        i += 1;
    }
    if let Some(start) = segment_start {
        output.push(&segmented[start..]);
    }

    Ok(format!("{origin}{}", output.concat()))
}

/// Longest key of `map` that is `name` or a `/`-bounded prefix of it.
pub fn get_map_match<'a, V>(map: &'a BTreeMap<String, V>, name: &str) -> Option<&'a str> {
    map.keys()
        .filter(|key| {
            name.starts_with(key.as_str())
                && (name.len() == key.len()
                    || name.as_bytes()[key.len()] == b'/'
                    || key.ends_with('/'))
        })
        .max_by_key(|key| (key.split('/').count(), key.len()))
        .map(String::as_str)
}

/// Apply `paths` to a resolved or plain key; plain results are joined to
/// `base_url`.
pub fn apply_paths(base_url: &str, paths: &BTreeMap<String, String>, key: &str) -> String {
    if let Some((pattern, target)) = paths_match(paths, key) {
        let rest = &key[pattern.trim_end_matches('*').len()..];
        let target = match target.find('*') {
            Some(star) => format!("{}{rest}{}", &target[..star], &target[star + 1..]),
            None => format!("{target}{rest}"),
        };
        return match resolve_if_not_plain(&target, Some(base_url)) {
            Ok(Some(resolved)) => resolved,
            _ => format!("{base_url}{target}"),
        };
    }

    if key.contains(':') {
        key.to_string()
    } else {
        format!("{base_url}{key}")
    }
}

fn paths_match<'a>(paths: &'a BTreeMap<String, String>, key: &str) -> Option<(&'a str, &'a str)> {
    let wildcard = paths
        .iter()
        .filter_map(|(pattern, target)| {
            let prefix = pattern.strip_suffix('*')?;
            key.starts_with(prefix).then_some((pattern.as_str(), target.as_str()))
        })
        .max_by_key(|(pattern, _)| pattern.len());

    let exact = get_map_match(paths, key).map(|pattern| (pattern, paths[pattern].as_str()));

    match (exact, wildcard) {
        (Some(exact), Some(wildcard)) if wildcard.0.len() - 1 > exact.0.len() => Some(wildcard),
        (Some(exact), _) => Some(exact),
        (None, wildcard) => wildcard,
    }
}

/// URL join, then `map` for plain specifiers, then `paths`.
///
/// `package_key` resolves the specifier as a package name: a trailing `/`
/// is kept out of the paths lookup.
pub(crate) fn core_resolve(
    rules: &Rules,
    specifier: &str,
    parent: Option<&str>,
    package_key: bool,
) -> Result<String> {
    let parent = parent.unwrap_or(&rules.base_url);
    if let Some(resolved) = resolve_if_not_plain(specifier, Some(parent))? {
        return Ok(apply_paths(&rules.base_url, &rules.paths, &resolved));
    }

    let mut key = specifier.to_string();
    if let Some(pattern) = get_map_match(&rules.map, specifier) {
        key = format!("{}{}", rules.map[pattern], &specifier[pattern.len()..]);
        if let Some(resolved) = resolve_if_not_plain(&key, Some(rules.base_url.as_str()))? {
            return Ok(apply_paths(&rules.base_url, &rules.paths, &resolved));
        }
    }

    let trailing_slash = package_key && !key.ends_with('/');
    if trailing_slash {
        let resolved = apply_paths(&rules.base_url, &rules.paths, &format!("{key}/"));
        return Ok(resolved.strip_suffix('/').unwrap_or(&resolved).to_string());
    }
    Ok(apply_paths(&rules.base_url, &rules.paths, &key))
}
