//! Callstream - incremental dispatcher for streamed LLM function calls
//!
//! Callstream reads a chat-completion stream while it is still arriving and
//! routes every argument of every called function to a concurrently running
//! handler as a growing sequence of deltas, assembling the final assistant
//! record once the stream ends.

pub mod demux;
pub mod diff;
pub mod dispatch;
pub mod error;
pub mod parser;
pub mod record;
pub mod stream;
pub mod structured;

pub use demux::{DemuxEvent, DemuxItem, Demuxer, demux};
pub use diff::{ArgumentMap, DiffPreprocessor, Identity, Preprocessor};
pub use dispatch::{
    ArgStream, Arguments, DispatchSession, Dispatched, Handler, Invocation, ParamKind, Parameter, Registry,
    SessionState, Target, ValueType, dispatch,
};
pub use error::{ArgumentError, CallstreamError, Result, TargetFailure};
pub use parser::{Format, IncrementalParser, ParseError, ParseState};
pub use record::{CallEvent, FunctionCall, ResultRecord};
pub use stream::{ChatCompletionChunk, RawMessage, load_log, render_log};
pub use structured::{Flow, StructHandler, StructOutcome, process_struct_response};
