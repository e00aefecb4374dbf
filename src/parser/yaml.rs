//! Incremental YAML parser.
//!
//! YAML has no closing delimiter, so completeness is never known and every
//! emission carries [`ParseState::Unknown`]. Only complete lines are read, and
//! the last node of the document is held back while more lines may extend it:
//! - the trailing member of a mapping is exposed only when it is a scalar
//! - the trailing element of a sequence is exposed once a later one begins
//!
//! [`IncrementalParser::flush`] reads the whole buffer once no more text will arrive.

use serde_json::Value;
use serde_yaml::{Mapping, Value as Yaml};

use super::{IncrementalParser, ParseError, ParseState};

/// Streaming YAML parser producing `Unknown` snapshots
#[derive(Debug, Default)]
pub struct YamlStreamParser {
    buffer: String,
    last: Option<Value>,
}

impl YamlStreamParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&mut self, value: Value) -> Vec<(ParseState, Value)> {
        if self.last.as_ref() == Some(&value) {
            return Vec::new();
        }
        self.last = Some(value.clone());
        vec![(ParseState::Unknown, value)]
    }
}

impl IncrementalParser for YamlStreamParser {
    fn feed(&mut self, text: &str) -> Result<Vec<(ParseState, Value)>, ParseError> {
        self.buffer.push_str(text);

        let Some(end) = self.buffer.rfind('\n') else {
            return Ok(Vec::new());
        };
        // Unreadable text stays buffered until more arrives
        match read(&self.buffer[..=end]).and_then(settled).and_then(to_json) {
            Some(value) => Ok(self.emit(value)),
            None => Ok(Vec::new()),
        }
    }

    fn flush(&mut self) -> Result<Vec<(ParseState, Value)>, ParseError> {
        match read(&self.buffer).and_then(to_json) {
            Some(value) => Ok(self.emit(value)),
            None => Ok(Vec::new()),
        }
    }

    fn close(&mut self) {
        self.buffer.clear();
        self.last = None;
    }
}

fn read(text: &str) -> Option<Yaml> {
    let doc: Yaml = serde_yaml::from_str(text).ok()?;
    (!doc.is_null()).then_some(doc)
}

fn to_json(doc: Yaml) -> Option<Value> {
    serde_json::to_value(doc).ok()
}

/// The part of a document that later lines can only extend by appending.
fn settled(doc: Yaml) -> Option<Yaml> {
    match doc {
        Yaml::Mapping(map) => {
            let count = map.len();
            let mut out = Mapping::new();
            for (index, (key, value)) in map.into_iter().enumerate() {
                if index + 1 < count {
                    out.insert(key, value);
                } else if let Some(value) = settled_member(value) {
                    out.insert(key, value);
                }
            }
            (!out.is_empty()).then_some(Yaml::Mapping(out))
        }
        Yaml::Sequence(mut items) => {
            items.pop();
            (!items.is_empty()).then_some(Yaml::Sequence(items))
        }
        Yaml::Null | Yaml::Tagged(_) => None,
        scalar => Some(scalar),
    }
}

/// Strings grow by appending and other scalars end with their line. Nested
/// mappings and empty values may still gain lines.
fn settled_member(value: Yaml) -> Option<Yaml> {
    match value {
        Yaml::Null | Yaml::Mapping(_) | Yaml::Tagged(_) => None,
        Yaml::Sequence(mut items) => {
            items.pop();
            (!items.is_empty()).then_some(Yaml::Sequence(items))
        }
        scalar => Some(scalar),
    }
}
