// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Source prologue parsing and module format detection.

use super::mask::mask;
use crate::config::Format;
use regex::Regex;
use std::sync::LazyLock;

/// Top-level `import`/`export` statements.
static ESM_SYNTAX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)(?:^|[;}])\s*(?:import\s*(?:['"`]|\{|\*\s*as\s|[\w$]+\s*(?:,\s*(?:\{|\*\s*as\s)[^;]*?)?\s*from\s*['"`])|export\s*(?:\*|\{|default\b|function\b|class\b|var\b|let\b|const\b|async\s+function\b))"#,
    )
    .expect("valid ESM detection regex")
});

/// `define(` in one of its AMD call shapes.
static AMD_DEFINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:^|[^$\w.])define\s*\(\s*(?:(?:"[^"]*"|'[^']*')\s*,\s*)?(?:\[|function\b|\{|[_$a-zA-Z][_$\w]*\s*\))"#,
    )
    .expect("valid AMD detection regex")
});

/// `exports.x`, `exports['x']`, `module.exports`, or a `require('x')` call.
static CJS_USAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:^|[^$\w.])(?:exports\s*(?:\.|\[)|module\s*(?:\.\s*exports|\[\s*['"]\s*\])|require\s*\(\s*['"`])"#,
    )
    .expect("valid CommonJS detection regex")
});

/// A leading bare-string directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaDirective {
    /// `"format cjs"`
    Format(String),
    /// `"deps jquery"`, repeatable
    Deps(String),
    /// `"exports $"`
    Exports(String),
    /// `"globals.$ jquery"`
    Global { name: String, specifier: String },
    /// `"tags[] value"`
    Append { name: String, value: String },
    /// `"loader css"` and other named values
    Set { name: String, value: String },
    /// `"bundle"`
    Bundle,
    /// `"esModule"`
    Flag(String),
}

impl MetaDirective {
    /// Parse the text of one directive string. `use ...` directives and
    /// anything that is not a directive yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() || text == "use strict" || text.starts_with("use ") {
            return None;
        }
        if text == "bundle" {
            return Some(MetaDirective::Bundle);
        }

        let Some((name, value)) = text.split_once(char::is_whitespace) else {
            return is_identifier(text).then(|| MetaDirective::Flag(text.to_string()));
        };
        let value = value.trim().to_string();

        if let Some(global) = name.strip_prefix("globals.") {
            return Some(MetaDirective::Global {
                name: global.to_string(),
                specifier: value,
            });
        }
        if let Some(array) = name.strip_suffix("[]") {
            return is_identifier(array).then(|| MetaDirective::Append {
                name: array.to_string(),
                value,
            });
        }
        match name {
            "format" => Some(MetaDirective::Format(value)),
            "deps" => Some(MetaDirective::Deps(value)),
            "exports" => Some(MetaDirective::Exports(value)),
            _ if is_identifier(name) => Some(MetaDirective::Set {
                name: name.to_string(),
                value,
            }),
            _ => None,
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Leading comments and directive strings of a source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prologue {
    pub directives: Vec<MetaDirective>,
    /// Byte offset of the first token after the prologue
    pub body_offset: usize,
}

/// Read leading whitespace, comments, a shebang line and directive strings.
pub fn read_prologue(source: &str) -> Prologue {
    let bytes = source.as_bytes();
    let len = bytes.len();
    let mut directives = Vec::new();
    let mut i = 0;

    if source.starts_with("#!") {
        i = source.find('\n').unwrap_or(len);
    }

    loop {
        while i < len && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if source[i..].starts_with("//") {
            i = source[i..].find('\n').map_or(len, |pos| i + pos);
            continue;
        }
        if source[i..].starts_with("/*") {
            i = source[i + 2..].find("*/").map_or(len, |pos| i + 2 + pos + 2);
            continue;
        }
        let quote = match bytes.get(i) {
            Some(&q @ (b'"' | b'\'')) => q,
            _ => break,
        };
        let Some(close) = source[i + 1..]
            .find(|c| c == quote as char || c == '\n')
            .map(|pos| i + 1 + pos)
            .filter(|&pos| bytes[pos] == quote)
        else {
            break;
        };

        // A string followed by anything but a terminator is an expression
        let mut after = close + 1;
        while after < len && matches!(bytes[after], b' ' | b'\t') {
            after += 1;
        }
        match bytes.get(after) {
            Some(b';') => after += 1,
            None | Some(b'\n') | Some(b'\r') => {}
            _ => break,
        }

        if let Some(directive) = MetaDirective::parse(&source[i + 1..close]) {
            directives.push(directive);
        }
        i = after;
    }

    Prologue {
        directives,
        body_offset: i.min(len),
    }
}

/// Result of format detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub format: Format,
    /// A leading `"bundle"` directive was found
    pub bundle: bool,
    pub prologue: Prologue,
}

/// Detect the format of a source with no configured format.
///
/// 1. a leading `"bundle"` directive: register format, flagged as bundle
/// 2. `System.register(` after the prologue: register
/// 3. top-level `import`/`export`: esm
/// 4. otherwise the legacy detection of [`detect_legacy`]
pub fn detect(source: &str) -> Detection {
    let prologue = read_prologue(source);
    let bundle = prologue.directives.contains(&MetaDirective::Bundle);
    let body = &source[prologue.body_offset..];

    let format = if bundle || starts_with_register(body) {
        Format::Register
    } else {
        let masked = mask(source);
        if is_esm(masked.as_str()) {
            Format::Esm
        } else {
            detect_legacy_masked(masked.as_str())
        }
    };

    Detection {
        format,
        bundle,
        prologue,
    }
}

/// Shorthand for `detect(source).format`.
pub fn detect_format(source: &str) -> Format {
    detect(source).format
}

fn starts_with_register(body: &str) -> bool {
    let rest = body
        .strip_prefix("System.register")
        .or_else(|| body.strip_prefix("SystemJS.register"));
    rest.is_some_and(|rest| rest.trim_start().starts_with('('))
}

fn is_esm(masked: &str) -> bool {
    ESM_SYNTAX.is_match(masked)
}

/// AMD, then CommonJS, falling back to global.
pub fn detect_legacy(source: &str) -> Format {
    detect_legacy_masked(mask(source).as_str())
}

fn detect_legacy_masked(masked: &str) -> Format {
    if AMD_DEFINE.is_match(masked) {
        Format::Amd
    } else if CJS_USAGE.is_match(masked) {
        Format::Cjs
    } else {
        Format::Global
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_after_comment_and_directive() {
        let source = "/* generated */\n'format register';\n\
                      System.register(['./a.js'], function ($__export) {});";
        let detection = detect(source);
        assert_eq!(detection.format, Format::Register);
        assert_eq!(
            detection.prologue.directives,
            vec![MetaDirective::Format("register".into())]
        );
    }

    #[test]
    fn test_register_after_line_comments() {
        assert_eq!(
            detect_format("// a\n// b\n\"use strict\";\nSystem.register ([], function () {});"),
            Format::Register
        );
    }

    #[test]
    fn test_esm_detection() {
        assert_eq!(detect_format("import { a } from './a.js';\nconsole.log(a);"), Format::Esm);
        assert_eq!(detect_format("const x = 1;\nexport default x;"), Format::Esm);
        assert_eq!(detect_format("import foo, * as ns from \"foo\""), Format::Esm);
        assert_eq!(detect_format("export * from './all.js'"), Format::Esm);
    }

    #[test]
    fn test_esm_keywords_in_comments_and_strings_ignored() {
        let masked_only = "// import x from 'y'\nvar s = \"export default 1\";";
        assert_eq!(detect_format(masked_only), Format::Global);
        assert_eq!(detect_format("var importer = require('x');"), Format::Cjs);
        assert_eq!(detect_format("import('./lazy.js').then(run);"), Format::Global);
    }

    #[test]
    fn test_legacy_detection_order() {
        assert_eq!(detect_format("define(['jquery'], function ($) { return {}; });"), Format::Amd);
        assert_eq!(detect_format("define('named', [], function () {});"), Format::Amd);
        assert_eq!(detect_format("module.exports = function () {};"), Format::Cjs);
        assert_eq!(detect_format("exports.a = 1;"), Format::Cjs);
        assert_eq!(detect_format("window.lib = {};"), Format::Global);
        assert_eq!(detect_format("obj.define(['x'], f);"), Format::Global);
    }

    #[test]
    fn test_bundle_marker() {
        let detection = detect("\"bundle\";\nSystem.register('a', [], function () {});");
        assert!(detection.bundle);
        assert_eq!(detection.format, Format::Register);
    }

    #[test]
    fn test_directive_parsing() {
        assert_eq!(MetaDirective::parse("use strict"), None);
        assert_eq!(MetaDirective::parse("deps jquery"), Some(MetaDirective::Deps("jquery".into())));
        assert_eq!(
            MetaDirective::parse("globals.$ jquery"),
            Some(MetaDirective::Global {
                name: "$".into(),
                specifier: "jquery".into()
            })
        );
        assert_eq!(
            MetaDirective::parse("tags[] a"),
            Some(MetaDirective::Append {
                name: "tags".into(),
                value: "a".into()
            })
        );
        assert_eq!(MetaDirective::parse("esModule"), Some(MetaDirective::Flag("esModule".into())));
        assert_eq!(
            MetaDirective::parse("loader css"),
            Some(MetaDirective::Set {
                name: "loader".into(),
                value: "css".into()
            })
        );
        assert_eq!(MetaDirective::parse("a-b c"), None);
    }

    #[test]
    fn test_expression_string_ends_prologue() {
        let prologue = read_prologue("'deps a'\n'abc'.split('')");
        assert_eq!(prologue.directives, vec![MetaDirective::Deps("a".into())]);
        assert_eq!(prologue.body_offset, "'deps a'\n".len());
    }

    #[test]
    fn test_shebang_skipped() {
        let prologue = read_prologue("#!/usr/bin/env node\n'format cjs';\nrequire('x');");
        assert_eq!(prologue.directives, vec![MetaDirective::Format("cjs".into())]);
    }
}
