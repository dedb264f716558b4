// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Static source analysis.
//!
//! Lightweight, regex-based heuristics that never execute code:
//!
//! - [`mask`]: blank out comments and string contents
//! - [`detect`]: parse leading meta directives and detect a module format
//! - [`require_specifiers`]: scan CommonJS `require('...')` calls

mod deps;
mod detect;
mod mask;

pub use deps::{read_string_array, read_string_literal, require_specifiers};
pub use detect::{
    Detection, MetaDirective, Prologue, detect, detect_format, detect_legacy, read_prologue,
};
pub use mask::{MaskedSource, mask};
