//! Dispatch of streamed calls to concurrently running handlers
//!
//! - `target`: targets, parameters, handlers and the registry
//! - `channel`: per-parameter argument channels and the streams handlers read
//! - `engine`: the router, the session state machine and [`dispatch`]
//! - `session`: [`DispatchSession`], the raw-stream entry point

pub mod channel;
pub mod engine;
pub mod session;
pub mod target;

pub use channel::{ArgStream, Arguments};
pub use engine::{SessionState, dispatch};
pub use session::{DispatchSession, Dispatched};
pub use target::{Handler, Invocation, ParamKind, Parameter, Registry, Target, ValueType};
