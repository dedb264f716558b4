// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Static dependency scanning.

use super::mask::{MaskedSource, mask};
use regex::Regex;
use std::sync::LazyLock;

static REQUIRE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[^$\w.])require\s*\(\s*(['"`])"#).expect("valid require regex")
});

/// Specifiers of `require('...')` calls, in order of appearance and without
/// duplicates. Calls inside comments or strings and calls with a
/// non-literal argument are skipped.
pub fn require_specifiers(source: &str) -> Vec<String> {
    let masked = mask(source);
    let mut found: Vec<String> = Vec::new();

    for captures in REQUIRE_CALL.captures_iter(masked.as_str()) {
        let Some(quote) = captures.get(1) else { continue };
        let Some((specifier, end)) = literal_at(source, &masked, quote.start()) else {
            continue;
        };
        let closes_call = masked.as_str()[end..].trim_start().starts_with(')');
        if closes_call && !found.contains(&specifier) {
            found.push(specifier);
        }
    }
    found
}

fn literal_at(source: &str, masked: &MaskedSource, offset: usize) -> Option<(String, usize)> {
    let range = masked.string_at(offset)?;
    let (value, end) = read_string_literal(source, range.start)?;
    // Template literals with substitutions are not static
    if source.as_bytes()[range.start] == b'`' && value.contains("${") {
        return None;
    }
    Some((value, end))
}

/// Read the string literal starting at `start`, returning its unescaped
/// value and the offset just past the closing quote.
pub fn read_string_literal(source: &str, start: usize) -> Option<(String, usize)> {
    let quote = *source.as_bytes().get(start)?;
    if !matches!(quote, b'\'' | b'"' | b'`') {
        return None;
    }

    let mut value = String::new();
    let mut chars = source[start + 1..].char_indices();
    while let Some((offset, c)) = chars.next() {
        match c {
            '\\' => {
                let (_, escaped) = chars.next()?;
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                });
            }
            '\n' if quote != b'`' => return None,
            c if c == quote as char => return Some((value, start + 1 + offset + 1)),
            c => value.push(c),
        }
    }
    None
}

/// Read an array literal of strings (`['a', "b"]`) starting at `start`,
/// returning the strings and the offset just past `]`. Comments between
/// elements are allowed; any non-string element fails the read.
pub fn read_string_array(source: &str, start: usize) -> Option<(Vec<String>, usize)> {
    if source.as_bytes().get(start) != Some(&b'[') {
        return None;
    }
    let masked = mask(source);
    let bytes = masked.as_str().as_bytes();
    let mut items = Vec::new();
    let mut i = start + 1;

    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        match bytes.get(i)? {
            b']' => return Some((items, i + 1)),
            b'\'' | b'"' | b'`' => {
                let (value, end) = read_string_literal(source, i)?;
                items.push(value);
                i = end;
                while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                match bytes.get(i)? {
                    b',' => i += 1,
                    b']' => return Some((items, i + 1)),
                    _ => return None,
                }
            }
            _ => return None,
        }
    }
}
