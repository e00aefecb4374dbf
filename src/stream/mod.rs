//! Upstream stream layer - chunk types, the neutral message shape and recorded logs.

pub mod chunk;
pub mod recording;

pub use chunk::{
    ChatCompletionChunk, Choice, ChunkDelta, FinishReason, FunctionCallDelta, MessageDelta, RawMessage, ToolCallDelta,
};
pub use recording::{load_log, parse_sse_line, render_log};
