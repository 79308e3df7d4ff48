//! Errors raised by the sampling engines.
//!
//! Every failure is an [`McError`] whose variant names the family (bad
//! parameters, an unusable ladder, a checkpoint for the wrong engine, ...)
//! and whose [`ErrorInfo`] payload carries a stable code plus the values that
//! triggered it, so callers can match on `info().code` instead of messages.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Code, message and context of an engine failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Kebab-case code such as `exchange-starvation` or `checkpoint-parse`.
    pub code: String,
    /// Diagnostic message.
    pub message: String,
    /// Offending values keyed by name: rung or pair indices, parameter
    /// values, file paths, expected and found checkpoint kinds.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Suggested parameter change, when one is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Payload with an empty context and no hint.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Records one offending value.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attaches a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

/// Failure of a sampling engine, grouped by family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum McError {
    /// Parameters out of range, or inputs that do not fit the engine
    /// (accumulator or configuration counts, missing step enumeration).
    #[error("config error: {0}")]
    Config(ErrorInfo),
    /// Ladder that cannot be built, measured or updated: unsorted rungs,
    /// starved exchange pairs, a flow derivative that never settles.
    #[error("ladder error: {0}")]
    Ladder(ErrorInfo),
    /// Non-finite intermediate in a ladder update.
    #[error("numeric error: {0}")]
    Numeric(ErrorInfo),
    /// Checkpoint written by another engine kind or configuration type.
    #[error("checkpoint error: {0}")]
    Checkpoint(ErrorInfo),
    /// Malformed checkpoint, configuration or accumulator document.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
    /// Checkpoint, configuration or accumulator file could not be accessed.
    #[error("io error: {0}")]
    Io(ErrorInfo),
    /// Process signal handlers could not be installed.
    #[error("signal error: {0}")]
    Signal(ErrorInfo),
}

impl McError {
    /// Payload of the error, whatever its family.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            McError::Config(info)
            | McError::Ladder(info)
            | McError::Numeric(info)
            | McError::Checkpoint(info)
            | McError::Serde(info)
            | McError::Io(info)
            | McError::Signal(info) => info,
        }
    }

    /// Family name as written to the `family` tag of the serialized form.
    pub fn family(&self) -> &'static str {
        match self {
            McError::Config(_) => "Config",
            McError::Ladder(_) => "Ladder",
            McError::Numeric(_) => "Numeric",
            McError::Checkpoint(_) => "Checkpoint",
            McError::Serde(_) => "Serde",
            McError::Io(_) => "Io",
            McError::Signal(_) => "Signal",
        }
    }

    /// Filesystem failure on `path`.
    pub fn io(code: &str, err: std::io::Error, path: &std::path::Path) -> Self {
        McError::Io(
            ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
        )
    }
}
