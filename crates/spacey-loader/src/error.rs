// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the module loader.

use std::fmt;
use thiserror::Error;

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Pipeline stage an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Turning a specifier into a key
    Resolving,
    /// Linking the dependencies of a registered module
    Loading,
    /// Fetch, translate and register
    Instantiating,
    /// Running module bodies
    Evaluating,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Resolving => "Resolving",
            Stage::Loading => "Loading",
            Stage::Instantiating => "Instantiating",
            Stage::Evaluating => "Evaluating",
        })
    }
}

/// Root classification of a loader error, independent of stage wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Resolution,
    Load,
    Eval,
    Validation,
    Shape,
}

/// Main error type for the loader.
///
/// Errors are `Clone` so a failure cached on a load record can be replayed
/// to every caller that asks for the same key.
#[derive(Error, Debug, Clone)]
pub enum LoaderError {
    /// Specifier could not be turned into a key
    #[error("ResolutionError: {0}")]
    Resolution(String),

    /// Fetch, translate or register failure
    #[error("LoadError: {0}")]
    Load(String),

    /// Transport could not deliver a payload
    #[error("LoadError: Fetch error loading {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Subresource integrity mismatch
    #[error("LoadError: Integrity check failed for {url}: expected {expected}")]
    IntegrityMismatch { url: String, expected: String },

    /// Format name not understood
    #[error("LoadError: Unknown module format \"{0}\"")]
    UnknownFormat(String),

    /// WebAssembly binary with an unreadable import section
    #[error("LoadError: Malformed WebAssembly module {key}: {reason}")]
    MalformedWasm { key: String, reason: String },

    /// Exception raised by module code
    #[error("EvalError: {0}")]
    Eval(String),

    /// Configuration or argument of the wrong shape
    #[error("ValidationError: {0}")]
    Validation(String),

    /// Contract violation by a plugin or registration
    #[error("TypeError: {0}")]
    Shape(String),

    /// An error annotated with the stage and key it surfaced through
    #[error("{source}\n  {stage} {key}{}", from_suffix(.parent))]
    Staged {
        stage: Stage,
        key: String,
        parent: Option<String>,
        #[source]
        source: Box<LoaderError>,
    },
}

fn from_suffix(parent: &Option<String>) -> String {
    parent
        .as_deref()
        .map(|parent| format!(" from {parent}"))
        .unwrap_or_default()
}

impl LoaderError {
    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution(message.into())
    }

    pub fn load(message: impl Into<String>) -> Self {
        Self::Load(message.into())
    }

    pub fn fetch(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn eval(message: impl Into<String>) -> Self {
        Self::Eval(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn shape(message: impl Into<String>) -> Self {
        Self::Shape(message.into())
    }

    /// Convert an error raised by module code into an `EvalError`.
    ///
    /// Loader errors that travelled through module code (a failing nested
    /// `require`, for instance) keep their original classification.
    pub fn thrown(err: anyhow::Error) -> Self {
        match err.downcast::<LoaderError>() {
            Ok(err) => err,
            Err(err) => Self::Eval(format!("{err:#}")),
        }
    }

    /// Convert an error raised while a script registers itself into a `LoadError`.
    pub fn script(err: anyhow::Error) -> Self {
        match err.downcast::<LoaderError>() {
            Ok(err) => err,
            Err(err) => Self::Load(format!("{err:#}")),
        }
    }

    /// Annotate with a stage context.
    ///
    /// Wrapping twice with the same stage and key is a no-op so replayed
    /// cached errors do not grow.
    pub fn with_stage(self, stage: Stage, key: &str, parent: Option<&str>) -> Self {
        if let Self::Staged {
            stage: existing,
            key: existing_key,
            ..
        } = &self
        {
            if *existing == stage && existing_key == key {
                return self;
            }
        }
        Self::Staged {
            stage,
            key: key.to_string(),
            parent: parent.map(str::to_string),
            source: Box::new(self),
        }
    }

    /// The innermost, unwrapped error.
    pub fn root(&self) -> &LoaderError {
        let mut current = self;
        while let Self::Staged { source, .. } = current {
            current = source;
        }
        current
    }

    /// Taxonomy entry of the innermost error.
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::Resolution(_) => ErrorKind::Resolution,
            Self::Load(_)
            | Self::Fetch { .. }
            | Self::IntegrityMismatch { .. }
            | Self::UnknownFormat(_)
            | Self::MalformedWasm { .. } => ErrorKind::Load,
            Self::Eval(_) => ErrorKind::Eval,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Shape(_) => ErrorKind::Shape,
            Self::Staged { .. } => unreachable!("root() never returns a staged error"),
        }
    }

    /// Stage contexts from outermost to innermost.
    pub fn stages(&self) -> Vec<(Stage, &str)> {
        let mut stages = Vec::new();
        let mut current = self;
        while let Self::Staged {
            stage, key, source, ..
        } = current
        {
            stages.push((*stage, key.as_str()));
            current = source;
        }
        stages
    }
}

impl From<serde_json::Error> for LoaderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<std::io::Error> for LoaderError {
    fn from(err: std::io::Error) -> Self {
        Self::Load(err.to_string())
    }
}
