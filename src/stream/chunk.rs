//! Streamed chat-completion chunks and the vendor-neutral message the demuxer reads.
//!
//! The chunk types mirror the OpenAI `chat.completions` streaming shape closely enough
//! to deserialize recorded logs. Everything past [`RawMessage`] is wire-format agnostic.

use serde::{Deserialize, Serialize};

/// One streamed chunk of a chat completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    /// Chunk ID from the API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Choices carried by this chunk; only the first is read
    #[serde(default)]
    pub choices: Vec<Choice>,
}

/// A single choice within a chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    /// Index of the choice
    #[serde(default)]
    pub index: u32,
    /// Incremental delta, absent on malformed chunks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<ChunkDelta>,
    /// Why generation stopped, set on the last chunk of a turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// Delta payload of a streamed choice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    /// Role marker, sent on the first chunk only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Plain assistant text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Legacy single function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCallDelta>,
    /// Tool calls; only the first entry is read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Function name and/or argument text fragment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Tool call fragment wrapping a function call delta.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCallDelta>,
}

/// Reason a choice stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    FunctionCall,
    ToolCalls,
    ContentFilter,
    #[serde(other)]
    Other,
}

impl FinishReason {
    /// Whether this reason closes a function call
    pub fn ends_call(&self) -> bool {
        matches!(self, Self::FunctionCall | Self::ToolCalls)
    }
}

/// The fragments a single upstream message may carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageDelta {
    /// Start of a new call to the named target
    pub name: Option<String>,
    /// Argument text for the current call
    pub arguments: Option<String>,
    /// Plain content text
    pub content: Option<String>,
}

/// Vendor-neutral upstream message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    /// `None` when the upstream message had no recognizable delta
    pub delta: Option<MessageDelta>,
    /// Explicit end-of-call signal
    pub end_of_call: bool,
}

impl RawMessage {
    /// Message naming a new call target
    pub fn name(name: impl Into<String>) -> Self {
        Self::with_delta(MessageDelta {
            name: Some(name.into()),
            ..MessageDelta::default()
        })
    }

    /// Message carrying argument text
    pub fn arguments(text: impl Into<String>) -> Self {
        Self::with_delta(MessageDelta {
            arguments: Some(text.into()),
            ..MessageDelta::default()
        })
    }

    /// Message carrying content text
    pub fn content(text: impl Into<String>) -> Self {
        Self::with_delta(MessageDelta {
            content: Some(text.into()),
            ..MessageDelta::default()
        })
    }

    /// End-of-call marker with an empty delta
    pub fn end() -> Self {
        Self {
            delta: Some(MessageDelta::default()),
            end_of_call: true,
        }
    }

    fn with_delta(delta: MessageDelta) -> Self {
        Self {
            delta: Some(delta),
            end_of_call: false,
        }
    }
}

impl From<ChatCompletionChunk> for RawMessage {
    fn from(chunk: ChatCompletionChunk) -> Self {
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Self::default();
        };

        let end_of_call = choice.finish_reason.is_some_and(|r| r.ends_call());
        let delta = choice.delta.map(|d| {
            let call = d
                .function_call
                .or_else(|| d.tool_calls.and_then(|calls| calls.into_iter().next()).and_then(|c| c.function));
            let (name, arguments) = match call {
                Some(f) => (f.name, f.arguments),
                None => (None, None),
            };
            MessageDelta {
                name,
                arguments,
                content: d.content,
            }
        });

        Self { delta, end_of_call }
    }
}
