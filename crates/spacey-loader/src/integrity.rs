// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Subresource integrity checks for fetched payloads.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Hash algorithms accepted in integrity metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Algorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "sha256" => Some(Algorithm::Sha256),
            "sha384" => Some(Algorithm::Sha384),
            "sha512" => Some(Algorithm::Sha512),
            _ => None,
        }
    }

    fn digest(&self, data: &[u8]) -> String {
        match self {
            Algorithm::Sha256 => BASE64.encode(Sha256::digest(data)),
            Algorithm::Sha384 => BASE64.encode(Sha384::digest(data)),
            Algorithm::Sha512 => BASE64.encode(Sha512::digest(data)),
        }
    }
}

/// Verify `data` against an SRI string (`sha384-BASE64 sha512-BASE64 ...`).
///
/// Only the strongest algorithm present is considered, as browsers do.
/// Unknown algorithms are ignored; metadata with no known algorithm passes.
pub fn verify(data: &[u8], integrity: &str) -> bool {
    let entries: Vec<(Algorithm, &str)> = integrity
        .split_whitespace()
        .filter_map(|entry| {
            let (algo, hash) = entry.split_once('-')?;
            // Options after '?' are reserved
            let hash = hash.split('?').next().unwrap_or(hash);
            Some((Algorithm::parse(algo)?, hash))
        })
        .collect();

    let Some(strongest) = entries.iter().map(|(algo, _)| *algo).max() else {
        return true;
    };
    let computed = strongest.digest(data);
    entries
        .iter()
        .filter(|(algo, _)| *algo == strongest)
        .any(|(_, expected)| *expected == computed)
}

/// Compute a `sha512-` integrity string.
pub fn compute(data: &[u8]) -> String {
    format!("sha512-{}", Algorithm::Sha512.digest(data))
}

/// Compute an integrity string with a specific algorithm.
pub fn compute_with(algorithm: Algorithm, data: &[u8]) -> String {
    let name = match algorithm {
        Algorithm::Sha256 => "sha256",
        Algorithm::Sha384 => "sha384",
        Algorithm::Sha512 => "sha512",
    };
    format!("{name}-{}", algorithm.digest(data))
}
