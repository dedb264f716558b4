// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Lexical masking of comments and string contents.
//!
//! Detection heuristics run regexes over the masked text so that keywords
//! inside comments or strings never match. Masking preserves byte offsets
//! and newlines, so a match position in the masked text is also a position
//! in the original source.

use std::ops::Range;

/// Source text with comments and string contents replaced by spaces.
#[derive(Debug, Clone)]
pub struct MaskedSource {
    text: String,
    strings: Vec<Range<usize>>,
}

impl MaskedSource {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Byte ranges of string literals, quotes included.
    pub fn strings(&self) -> &[Range<usize>] {
        &self.strings
    }

    /// The string literal whose opening quote is at `offset`.
    pub fn string_at(&self, offset: usize) -> Option<Range<usize>> {
        self.strings
            .binary_search_by(|range| range.start.cmp(&offset))
            .ok()
            .map(|index| self.strings[index].clone())
    }
}

/// Mask `source`.
///
/// Regular expression literals are not recognized; a quote inside one is
/// taken as the start of a string.
pub fn mask(source: &str) -> MaskedSource {
    let bytes = source.as_bytes();
    let len = bytes.len();
    let mut out = bytes.to_vec();
    let mut strings = Vec::new();
    let mut i = 0;

    while i < len {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                let end = find_byte(bytes, i, b'\n').unwrap_or(len);
                blank(&mut out, i..end);
                i = end;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = find_seq(bytes, i + 2, b"*/").map_or(len, |pos| pos + 2);
                blank(&mut out, i..end);
                i = end;
            }
            quote @ (b'\'' | b'"' | b'`') => {
                let start = i;
                i += 1;
                while i < len {
                    match bytes[i] {
                        b'\\' => i += 2,
                        c if c == quote => break,
                        b'\n' if quote != b'`' => break,
                        _ => i += 1,
                    }
                }
                let close = i.min(len);
                blank(&mut out, start + 1..close);
                let end = if close < len && bytes[close] == quote {
                    close + 1
                } else {
                    close
                };
                strings.push(start..end);
                i = end.max(start + 1);
            }
            _ => i += 1,
        }
    }

    let text = match String::from_utf8(out) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    };
    MaskedSource { text, strings }
}

fn blank(out: &mut [u8], range: Range<usize>) {
    for byte in &mut out[range] {
        if *byte != b'\n' {
            *byte = b' ';
        }
    }
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> Option<usize> {
    bytes[from..].iter().position(|&b| b == needle).map(|pos| from + pos)
}

fn find_seq(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| from + pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comments_blanked_offsets_kept() {
        let source = "a // require('x')\n/* define([]) */ b";
        let masked = mask(source);
        assert_eq!(masked.as_str().len(), source.len());
        assert!(!masked.as_str().contains("require"));
        assert!(!masked.as_str().contains("define"));
        assert!(masked.as_str().starts_with("a "));
        assert!(masked.as_str().ends_with(" b"));
        assert_eq!(masked.as_str().matches('\n').count(), 1);
    }

    #[test]
    fn test_string_contents_blanked_quotes_kept() {
        let source = r#"var s = "import x from 'y'"; require('z')"#;
        let masked = mask(source);
        assert!(!masked.as_str().contains("import"));
        assert!(masked.as_str().contains("require('"));
        let quote = source.find("'z'").unwrap();
        let range = masked.string_at(quote).unwrap();
        assert_eq!(&source[range], "'z'");
        assert_eq!(masked.strings().len(), 2);
    }

    #[test]
    fn test_escaped_quote_and_multibyte() {
        let source = "x = 'it\\'s é'; y";
        let masked = mask(source);
        assert_eq!(masked.strings().len(), 1);
        assert!(masked.as_str().ends_with("; y"));
    }

    #[test]
    fn test_unterminated_constructs() {
        let masked = mask("a /* never closed");
        assert_eq!(masked.as_str().trim(), "a");
        let masked = mask("b = 'open");
        assert_eq!(masked.strings().len(), 1);
    }
}
