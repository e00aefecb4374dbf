//! Snapshot-to-delta conversion.
//!
//! Parsers report growing snapshots of a call's arguments; handlers want only
//! what is new. [`DiffPreprocessor`] remembers the last snapshot per target and
//! strips the part each field already delivered.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Arguments of one call, keyed by parameter name
pub type ArgumentMap = Map<String, Value>;

/// Rewrites a target's arguments before they are routed.
pub trait Preprocessor: Send {
    fn preprocess(&mut self, target: &str, arguments: ArgumentMap) -> ArgumentMap;
}

/// Passes arguments through untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl Preprocessor for Identity {
    fn preprocess(&mut self, _target: &str, arguments: ArgumentMap) -> ArgumentMap {
        arguments
    }
}

/// Emits only fields that are new or have grown since the previous snapshot
#[derive(Debug, Default)]
pub struct DiffPreprocessor {
    content_target: Option<String>,
    previous: HashMap<String, ArgumentMap>,
}

impl DiffPreprocessor {
    /// Create a preprocessor. Arguments of `content_target` already arrive as
    /// increments and are passed through.
    pub fn new(content_target: Option<String>) -> Self {
        Self {
            content_target,
            previous: HashMap::new(),
        }
    }
}

impl Preprocessor for DiffPreprocessor {
    fn preprocess(&mut self, target: &str, snapshot: ArgumentMap) -> ArgumentMap {
        if self.content_target.as_deref() == Some(target) {
            return snapshot;
        }

        let mut delta = Map::new();
        match self.previous.get(target) {
            Some(prev) => {
                for (field, current) in &snapshot {
                    match prev.get(field) {
                        None => {
                            delta.insert(field.clone(), current.clone());
                        }
                        Some(old) if old != current => {
                            delta.insert(field.clone(), field_delta(old, current));
                        }
                        Some(_) => {}
                    }
                }
            }
            None => delta = snapshot.clone(),
        }

        self.previous.insert(target.to_string(), snapshot);
        delta
    }
}

/// Portion of `current` not present in `old`.
///
/// Strings and arrays that grew by appending yield the appended part. Anything
/// else changed in place, so the whole new value is returned.
pub fn field_delta(old: &Value, current: &Value) -> Value {
    match (old, current) {
        (Value::String(old), Value::String(current)) => match current.strip_prefix(old.as_str()) {
            Some(suffix) => Value::String(suffix.to_string()),
            None => Value::String(current.clone()),
        },
        (Value::Array(old), Value::Array(current)) if current.starts_with(old) => {
            Value::Array(current[old.len()..].to_vec())
        }
        _ => current.clone(),
    }
}

/// Fold a delta into an accumulated value, the inverse of [`field_delta`].
pub fn merge_delta(acc: &mut Option<Value>, delta: Value) {
    match (acc, delta) {
        (Some(Value::String(s)), Value::String(more)) => s.push_str(&more),
        (Some(Value::Array(items)), Value::Array(more)) => items.extend(more),
        (acc, delta) => *acc = Some(delta),
    }
}
