//! Incremental structured parsers.
//!
//! A parser accepts arbitrary text fragments and reports `(ParseState, Value)`
//! snapshots as soon as the buffered text describes something new. Text that
//! cannot be interpreted yet stays buffered; closing a parser discards it.

pub mod json;
pub mod yaml;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use json::JsonStreamParser;
pub use yaml::YamlStreamParser;

/// Completeness tag on a parser emission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseState {
    /// Value not structurally complete yet
    Partial,
    /// Top-level value finished
    Complete,
    /// Format cannot report completeness
    Unknown,
}

impl ParseState {
    /// Whether an emission with this state should be treated as a finished value
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete | Self::Unknown)
    }
}

/// Serialization format of streamed structured text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Json,
    Yaml,
}

impl Format {
    /// Create a fresh parser for this format
    pub fn parser(&self) -> Box<dyn IncrementalParser> {
        match self {
            Self::Json => Box::new(JsonStreamParser::new()),
            Self::Yaml => Box::new(YamlStreamParser::new()),
        }
    }

    /// Parse from string representation
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }

    /// Parse a fully arrived document in this format
    pub fn parse_complete(&self, text: &str) -> crate::Result<Value> {
        match self {
            Self::Json => Ok(serde_json::from_str(text)?),
            Self::Yaml => {
                let value: serde_yaml::Value = serde_yaml::from_str(text)?;
                Ok(serde_json::to_value(value)?)
            }
        }
    }
}

/// Unrecoverable syntax error in streamed text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Parser that consumes text fragments and yields snapshots.
pub trait IncrementalParser: Send {
    /// Buffer `text` and return every snapshot it made available.
    fn feed(&mut self, text: &str) -> Result<Vec<(ParseState, Value)>, ParseError>;

    /// Emit what is left once no more text will arrive for this value.
    ///
    /// Formats that report completeness discard unfinished text instead.
    fn flush(&mut self) -> Result<Vec<(ParseState, Value)>, ParseError> {
        Ok(Vec::new())
    }

    /// Discard buffered text that never formed a value.
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_state_completeness() {
        assert!(!ParseState::Partial.is_complete());
        assert!(ParseState::Complete.is_complete());
        assert!(ParseState::Unknown.is_complete());
    }

    #[test]
    fn test_format_from_name() {
        assert_eq!(Format::from_name("JSON"), Some(Format::Json));
        assert_eq!(Format::from_name("yml"), Some(Format::Yaml));
        assert_eq!(Format::from_name("toml"), None);
    }

    #[test]
    fn test_format_serde_names() {
        let f: Format = serde_yaml::from_str("yaml").unwrap();
        assert_eq!(f, Format::Yaml);
        assert_eq!(serde_json::to_string(&Format::Json).unwrap(), "\"json\"");
    }

    #[test]
    fn test_parse_complete_both_formats() {
        assert_eq!(Format::Json.parse_complete(r#"{"a": [1, 2]}"#).unwrap(), json!({"a": [1, 2]}));
        assert_eq!(Format::Yaml.parse_complete("a:\n  - 1\n  - 2\n").unwrap(), json!({"a": [1, 2]}));
        assert!(Format::Json.parse_complete("{").is_err());
    }

    #[test]
    fn test_format_parser_factory() {
        let mut parser = Format::Json.parser();
        let out = parser.feed(r#"{"a":"b"}"#).unwrap();
        assert_eq!(out, vec![(ParseState::Complete, json!({"a": "b"}))]);
    }
}
