//! Consolidated result record
//!
//! Built while events are classified: content text is concatenated and the last
//! finished call is kept so the caller can append the turn to its message history.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::demux::DemuxEvent;
use crate::diff::ArgumentMap;
use crate::error::TargetFailure;
use crate::parser::ParseState;

/// A finished call as it appears in the message history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments serialized as JSON text
    pub arguments: String,
}

/// Assistant turn assembled from the stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

impl Default for ResultRecord {
    fn default() -> Self {
        Self {
            role: "assistant".to_string(),
            content: None,
            function_call: None,
        }
    }
}

/// Arguments for one target, ready for routing
#[derive(Debug, Clone, PartialEq)]
pub struct CallEvent {
    pub target: String,
    pub state: ParseState,
    pub arguments: ArgumentMap,
}

impl CallEvent {
    pub fn new(target: impl Into<String>, state: ParseState, arguments: ArgumentMap) -> Self {
        Self {
            target: target.into(),
            state,
            arguments,
        }
    }
}

/// Where content text goes: the content target and its single parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSlot {
    pub target: String,
    pub parameter: String,
}

/// Turns demuxed events into call events while recording the turn
#[derive(Debug)]
pub struct RecordBuilder {
    content: Option<ContentSlot>,
    record: ResultRecord,
}

impl RecordBuilder {
    pub fn new(content: Option<ContentSlot>) -> Self {
        Self {
            content,
            record: ResultRecord::default(),
        }
    }

    /// Classify one event.
    ///
    /// Returns `Ok(None)` for content with no registered content target. A call
    /// whose arguments are not an object is reported as a parser failure.
    pub fn classify(&mut self, event: DemuxEvent) -> Result<Option<CallEvent>, TargetFailure> {
        let Some(target) = event.target else {
            tracing::debug!("Content without a content target dropped");
            return Ok(None);
        };

        if let Some(slot) = &self.content
            && slot.target == target
        {
            let text = match event.fragment {
                Value::String(s) => s,
                other => other.to_string(),
            };
            self.record.content.get_or_insert_with(String::new).push_str(&text);
            let mut arguments = Map::new();
            arguments.insert(slot.parameter.clone(), Value::String(text));
            return Ok(Some(CallEvent::new(target, event.state, arguments)));
        }

        let arguments = match event.fragment {
            Value::Object(arguments) => arguments,
            other => {
                return Err(TargetFailure::Parser {
                    target,
                    message: format!("arguments must be an object, got {}", other),
                });
            }
        };

        if event.state.is_complete() {
            self.record.function_call = Some(FunctionCall {
                name: target.clone(),
                arguments: Value::Object(arguments.clone()).to_string(),
            });
        }

        Ok(Some(CallEvent::new(target, event.state, arguments)))
    }

    /// Current state of the record
    pub fn record(&self) -> &ResultRecord {
        &self.record
    }

    pub fn finish(self) -> ResultRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(target: Option<&str>, state: ParseState, fragment: Value) -> DemuxEvent {
        DemuxEvent {
            target: target.map(str::to_string),
            state,
            fragment,
        }
    }

    fn content_slot() -> Option<ContentSlot> {
        Some(ContentSlot {
            target: "content".to_string(),
            parameter: "text".to_string(),
        })
    }

    #[test]
    fn test_content_is_concatenated_and_mapped() {
        let mut builder = RecordBuilder::new(content_slot());
        let first = builder
            .classify(event(Some("content"), ParseState::Partial, json!("Hel")))
            .unwrap()
            .unwrap();
        builder
            .classify(event(Some("content"), ParseState::Partial, json!("lo")))
            .unwrap();

        assert_eq!(first.target, "content");
        assert_eq!(Value::Object(first.arguments), json!({"text": "Hel"}));
        assert_eq!(builder.record().content.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_unlabeled_content_is_dropped() {
        let mut builder = RecordBuilder::new(None);
        let out = builder.classify(event(None, ParseState::Partial, json!("note"))).unwrap();
        assert!(out.is_none());
        assert_eq!(builder.finish().content, None);
    }

    #[test]
    fn test_complete_call_recorded() {
        let mut builder = RecordBuilder::new(None);
        builder
            .classify(event(Some("f"), ParseState::Partial, json!({"a": "x"})))
            .unwrap();
        assert_eq!(builder.record().function_call, None);

        builder
            .classify(event(Some("f"), ParseState::Complete, json!({"a": "xy"})))
            .unwrap();
        let record = builder.finish();
        assert_eq!(
            record.function_call,
            Some(FunctionCall {
                name: "f".to_string(),
                arguments: r#"{"a":"xy"}"#.to_string(),
            })
        );
    }

    #[test]
    fn test_unknown_state_counts_as_complete() {
        let mut builder = RecordBuilder::new(None);
        builder
            .classify(event(Some("f"), ParseState::Unknown, json!({"a": 1})))
            .unwrap();
        assert_eq!(builder.finish().function_call.unwrap().name, "f");
    }

    #[test]
    fn test_non_object_arguments_fail_the_target() {
        let mut builder = RecordBuilder::new(None);
        let err = builder
            .classify(event(Some("f"), ParseState::Complete, json!("text")))
            .unwrap_err();
        assert_eq!(err.target(), "f");
    }

    #[test]
    fn test_record_serialization() {
        let record = ResultRecord {
            content: Some("hi".to_string()),
            ..ResultRecord::default()
        };
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"role": "assistant", "content": "hi"})
        );
    }
}
