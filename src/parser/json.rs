//! Incremental JSON parser.
//!
//! `jsonmodem` tokenizes the text one character at a time; its events are folded
//! into the value under construction. A finished top-level value is reported as
//! [`ParseState::Complete`] and the parser restarts for the next one.
//!
//! Snapshot rules keep every field append-only between emissions:
//! - strings are exposed while still open, at the top level and as members of the
//!   top-level object
//! - arrays only expose completed elements
//! - nested objects, numbers and literals appear once they are complete

use jsonmodem::{ParseEvent, ParserOptions, PathComponent, StreamingParser};
use serde_json::{Map, Number, Value};

use super::{IncrementalParser, ParseError, ParseState};

enum Frame {
    Object(Map<String, Value>),
    Array(Vec<Value>),
}

/// A container that has begun but not ended, with its key in the parent
struct Open {
    key: Option<String>,
    frame: Frame,
}

/// Streaming JSON parser producing growing snapshots
pub struct JsonStreamParser {
    parser: StreamingParser,
    stack: Vec<Open>,
    /// Open string and its key in the innermost container
    text: Option<(Option<String>, String)>,
    /// Skipping text until a value opens
    seeking: bool,
    last: Option<Value>,
}

impl Default for JsonStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonStreamParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self {
            parser: StreamingParser::new(ParserOptions::default()),
            stack: Vec::new(),
            text: None,
            seeking: true,
            last: None,
        }
    }

    /// Apply every pending event. Returns the top-level value once it ends.
    fn drain(&mut self) -> Result<Option<Value>, ParseError> {
        let mut done = None;
        while let Some(event) = self.parser.next() {
            let event = event.map_err(|e| ParseError::new(e.to_string()))?;
            if let Some(value) = self.apply(event) {
                done = Some(value);
            }
        }
        Ok(done)
    }

    fn apply(&mut self, event: ParseEvent) -> Option<Value> {
        match event {
            ParseEvent::ObjectBegin { path, .. } => {
                self.stack.push(Open {
                    key: key_of(&path),
                    frame: Frame::Object(Map::new()),
                });
                None
            }
            ParseEvent::ArrayStart { path, .. } => {
                self.stack.push(Open {
                    key: key_of(&path),
                    frame: Frame::Array(Vec::new()),
                });
                None
            }
            ParseEvent::ObjectEnd { .. } | ParseEvent::ArrayEnd { .. } => {
                let open = self.stack.pop()?;
                let value = match open.frame {
                    Frame::Object(map) => Value::Object(map),
                    Frame::Array(items) => Value::Array(items),
                };
                self.attach(open.key, value)
            }
            ParseEvent::String {
                path,
                fragment,
                is_final,
                ..
            } => {
                let (_, text) = self.text.get_or_insert_with(|| (key_of(&path), String::new()));
                text.push_str(&fragment);
                if !is_final {
                    return None;
                }
                let (key, text) = self.text.take()?;
                self.attach(key, Value::String(text))
            }
            ParseEvent::Number { path, value, .. } => self.attach(key_of(&path), number(value)),
            ParseEvent::Boolean { path, value, .. } => self.attach(key_of(&path), Value::Bool(value)),
            ParseEvent::Null { path, .. } => self.attach(key_of(&path), Value::Null),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Place a finished value in the innermost open container, or hand it back
    /// when it is the top-level value.
    fn attach(&mut self, key: Option<String>, value: Value) -> Option<Value> {
        match self.stack.last_mut() {
            None => Some(value),
            Some(Open {
                frame: Frame::Object(map),
                ..
            }) => {
                if let Some(key) = key {
                    map.insert(key, value);
                }
                None
            }
            Some(Open {
                frame: Frame::Array(items),
                ..
            }) => {
                items.push(value);
                None
            }
        }
    }

    /// Snapshot of the unfinished top-level value, `None` while nothing useful arrived.
    fn snapshot(&self) -> Option<Value> {
        let value = match self.stack.first() {
            None => Value::String(self.text.as_ref()?.1.clone()),
            Some(Open {
                frame: Frame::Array(items),
                ..
            }) => Value::Array(items.clone()),
            Some(Open {
                frame: Frame::Object(map),
                ..
            }) => {
                let mut map = map.clone();
                match (self.stack.get(1), &self.text) {
                    (None, Some((Some(key), text))) => {
                        map.insert(key.clone(), Value::String(text.clone()));
                    }
                    (
                        Some(Open {
                            key: Some(key),
                            frame: Frame::Array(items),
                        }),
                        _,
                    ) => {
                        map.insert(key.clone(), Value::Array(items.clone()));
                    }
                    _ => {}
                }
                Value::Object(map)
            }
        };
        let empty = match &value {
            Value::Object(map) => map.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::String(s) => s.is_empty(),
            _ => false,
        };
        (!empty).then_some(value)
    }
}

impl IncrementalParser for JsonStreamParser {
    fn feed(&mut self, text: &str) -> Result<Vec<(ParseState, Value)>, ParseError> {
        let mut out = Vec::new();

        for (start, c) in text.char_indices() {
            if self.seeking {
                if !matches!(c, '{' | '[' | '"') {
                    continue;
                }
                self.seeking = false;
            }
            self.parser.feed(&text[start..start + c.len_utf8()]);
            match self.drain() {
                Ok(Some(value)) => {
                    self.close();
                    out.push((ParseState::Complete, value));
                }
                Ok(None) => {}
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }
        }

        if !self.seeking
            && let Some(snapshot) = self.snapshot()
            && self.last.as_ref() != Some(&snapshot)
        {
            self.last = Some(snapshot.clone());
            out.push((ParseState::Partial, snapshot));
        }
        Ok(out)
    }

    fn close(&mut self) {
        *self = Self::new();
    }
}

fn key_of(path: &[PathComponent]) -> Option<String> {
    match path.last() {
        Some(PathComponent::Key(key)) => Some(key.to_string()),
        _ => None,
    }
}

/// Integral values keep serde_json's integer representation.
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        Value::from(value as i64)
    } else {
        Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}
