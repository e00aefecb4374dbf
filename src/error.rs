//! Error types for Callstream
//!
//! Centralized error handling using thiserror.

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

/// All error types that can end a dispatch session
#[derive(Debug, Error)]
pub enum CallstreamError {
    /// A context-bound target was registered but no shared context was supplied
    #[error("Configuration error: target '{0}' requires a shared context")]
    MissingContext(String),

    /// Two targets registered under the same name
    #[error("Configuration error: duplicate target '{0}'")]
    DuplicateTarget(String),

    /// Content target does not have the single string stream parameter it needs
    #[error("Configuration error: invalid content target: {0}")]
    InvalidContentTarget(String),

    /// The stream named a target that was never registered
    #[error("Protocol error: unknown target '{0}'")]
    UnknownTarget(String),

    /// The stream supplied an argument the target does not declare
    #[error("Protocol error: unknown parameter '{parameter}' for target '{target}'")]
    UnknownParameter { target: String, parameter: String },

    /// A raw message carried neither a delta nor an end-of-call marker
    #[error("Protocol error: no delta in message")]
    MissingDelta,

    /// The stream was consumed but one or more targets failed along the way
    #[error("Dispatch failed for {} target(s): {}", .failures.len(), FailureList(.failures))]
    Failed {
        invoked: BTreeSet<String>,
        failures: Vec<TargetFailure>,
    },

    /// Structured-response mode never managed to parse a value
    #[error("No structured response could be parsed from the stream")]
    NoStructuredResponse,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CallstreamError {
    /// Errors detected before the stream is consumed
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingContext(_) | Self::DuplicateTarget(_) | Self::InvalidContentTarget(_)
        )
    }

    /// Errors caused by malformed or unexpected upstream data
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::UnknownTarget(_) | Self::UnknownParameter { .. } | Self::MissingDelta
        )
    }
}

/// Failure delivered on a single argument channel
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentError {
    /// Delta did not match the declared parameter type
    #[error("argument '{parameter}' of '{target}' expected {expected}, got {found}")]
    TypeMismatch {
        target: String,
        parameter: String,
        expected: String,
        found: String,
    },

    /// The target's argument text could not be parsed
    #[error("arguments of '{target}' could not be parsed: {message}")]
    Parse { target: String, message: String },

    /// Handler asked for a parameter its target never declared
    #[error("'{target}' has no parameter '{parameter}'")]
    Undeclared { target: String, parameter: String },
}

/// A failure attributed to one target during a session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetFailure {
    /// Value error on one (target, parameter) channel
    #[error("{0}")]
    Argument(ArgumentError),

    /// Unrecoverable parser error for the target's remaining arguments
    #[error("parser error in '{target}': {message}")]
    Parser { target: String, message: String },

    /// Handler returned an error or panicked
    #[error("handler '{target}' failed: {message}")]
    Handler { target: String, message: String },
}

impl TargetFailure {
    /// Name of the target this failure belongs to
    pub fn target(&self) -> &str {
        match self {
            Self::Argument(ArgumentError::TypeMismatch { target, .. })
            | Self::Argument(ArgumentError::Parse { target, .. })
            | Self::Argument(ArgumentError::Undeclared { target, .. })
            | Self::Parser { target, .. }
            | Self::Handler { target, .. } => target,
        }
    }
}

struct FailureList<'a>(&'a [TargetFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

/// Result type alias for Callstream operations
pub type Result<T> = std::result::Result<T, CallstreamError>;
