//! Structured-response mode
//!
//! The assistant answers with a single structured document in its content
//! text. The content is parsed incrementally and every snapshot that fits the
//! model type is handed to a [`StructHandler`], which may stop parsing early.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::dispatch::{DispatchSession, Handler, Invocation, Registry, Target, ValueType};
use crate::error::{CallstreamError, Result};
use crate::parser::Format;
use crate::record::ResultRecord;
use crate::stream::RawMessage;

const CONTENT_TARGET: &str = "content";
const CONTENT_PARAMETER: &str = "content";

/// What to do after a snapshot was handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Flow {
    #[default]
    Continue,
    /// Stop parsing; the rest of the content is ignored
    Terminate,
}

/// Final result of structured-response mode
#[derive(Debug, Clone, PartialEq)]
pub enum StructOutcome<T> {
    /// The last snapshot that fit the model type
    Parsed(T),
    /// The handler stopped parsing
    Terminated,
}

/// Receives partially parsed models
#[async_trait]
pub trait StructHandler<T: Send + 'static>: Send + Sync {
    /// Handle a snapshot of the model; fields that have not arrived yet hold their defaults
    async fn handle_partially_parsed(&self, data: T) -> Flow;

    /// Called once after [`Flow::Terminate`] was returned
    async fn terminated(&self) {}
}

struct StructState<T, H> {
    handler: H,
    format: Format,
    outcome: Mutex<Option<StructOutcome<T>>>,
}

struct ContentParser;

#[async_trait]
impl<T, H> Handler<StructState<T, H>> for ContentParser
where
    T: DeserializeOwned + Clone + Send + 'static,
    H: StructHandler<T> + 'static,
{
    async fn call(&self, invocation: Invocation<StructState<T, H>>) -> eyre::Result<()> {
        let Some(state) = invocation.context else {
            eyre::bail!("structured response handler started without its state");
        };
        let mut args = invocation.args;
        let mut content = args.take(CONTENT_PARAMETER)?;
        let mut parser = state.format.parser();
        let mut last = None;

        let mut finished = false;
        while !finished {
            let snapshots = match content.next().await {
                Some(token) => {
                    let text = match token? {
                        Value::String(text) => text,
                        other => other.to_string(),
                    };
                    parser.feed(&text)?
                }
                None => {
                    finished = true;
                    parser.flush()?
                }
            };
            for (_, value) in snapshots {
                let Ok(data) = serde_json::from_value::<T>(value) else {
                    continue;
                };
                match state.handler.handle_partially_parsed(data.clone()).await {
                    Flow::Continue => last = Some(StructOutcome::Parsed(data)),
                    Flow::Terminate => {
                        last = Some(StructOutcome::Terminated);
                        finished = true;
                        break;
                    }
                }
            }
        }

        if matches!(last, Some(StructOutcome::Terminated)) {
            tracing::debug!("Structured response terminated by handler");
            state.handler.terminated().await;
        }
        *state.outcome.lock().await = last;
        Ok(())
    }
}

/// Parse the content of `messages` as a structured document of type `T`.
///
/// Snapshots that do not deserialize into `T` are skipped. Fails with
/// [`CallstreamError::NoStructuredResponse`] when no snapshot fit.
pub async fn process_struct_response<T, H, S>(
    messages: S,
    handler: H,
    format: Format,
) -> Result<(StructOutcome<T>, ResultRecord)>
where
    T: DeserializeOwned + Clone + Send + 'static,
    H: StructHandler<T> + 'static,
    S: Stream<Item = RawMessage> + Send,
{
    let state = Arc::new(StructState {
        handler,
        format,
        outcome: Mutex::new(None),
    });

    let mut registry: Registry<StructState<T, H>> = Registry::new();
    registry.register_content(
        Target::new(CONTENT_TARGET, ContentParser)
            .stream(CONTENT_PARAMETER, ValueType::String)
            .with_context(),
    )?;

    let dispatched = DispatchSession::new(registry)
        .with_context(Arc::clone(&state))
        .run(messages)
        .await?;

    let outcome = state.outcome.lock().await.take();
    match outcome {
        Some(outcome) => Ok((outcome, dispatched.record)),
        None => Err(CallstreamError::NoStructuredResponse),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, PartialEq, Deserialize)]
    #[serde(default)]
    struct MathProblem {
        steps: Vec<String>,
        answer: Option<i64>,
    }

    #[derive(Default)]
    struct Collector {
        seen: Mutex<Vec<MathProblem>>,
        stop_after_steps: Option<usize>,
        terminated: Mutex<bool>,
    }

    #[async_trait]
    impl StructHandler<MathProblem> for Collector {
        async fn handle_partially_parsed(&self, data: MathProblem) -> Flow {
            let steps = data.steps.len();
            self.seen.lock().await.push(data);
            match self.stop_after_steps {
                Some(limit) if steps >= limit => Flow::Terminate,
                _ => Flow::Continue,
            }
        }

        async fn terminated(&self) {
            *self.terminated.lock().await = true;
        }
    }

    fn content(parts: &[&str]) -> impl Stream<Item = RawMessage> + Send {
        let messages: Vec<_> = parts.iter().map(|p| RawMessage::content(*p)).collect();
        futures::stream::iter(messages)
    }

    #[tokio::test]
    async fn test_json_struct_response() {
        let (outcome, record) = process_struct_response(
            content(&[r#"{"steps": ["mul"#, r#"tiply", "add"], "#, r#""answer": 7}"#]),
            Collector::default(),
            Format::Json,
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            StructOutcome::Parsed(MathProblem {
                steps: vec!["multiply".to_string(), "add".to_string()],
                answer: Some(7),
            })
        );
        assert_eq!(record.role, "assistant");
        assert_eq!(
            record.content.as_deref(),
            Some(r#"{"steps": ["multiply", "add"], "answer": 7}"#)
        );
    }

    #[tokio::test]
    async fn test_yaml_struct_response() {
        let (outcome, _) = process_struct_response(
            content(&["steps:\n  - multiply\n", "  - add\nanswer: 7"]),
            Collector::default(),
            Format::Yaml,
        )
        .await
        .unwrap();

        let StructOutcome::Parsed(problem) = outcome else {
            panic!("expected a parsed model");
        };
        assert_eq!(problem.steps, vec!["multiply", "add"]);
        assert_eq!(problem.answer, Some(7));
    }

    #[tokio::test]
    async fn test_terminate_stops_parsing() {
        let collector = Collector {
            stop_after_steps: Some(1),
            ..Collector::default()
        };
        let state = Arc::new(collector);

        struct Shared(Arc<Collector>);

        #[async_trait]
        impl StructHandler<MathProblem> for Shared {
            async fn handle_partially_parsed(&self, data: MathProblem) -> Flow {
                self.0.handle_partially_parsed(data).await
            }

            async fn terminated(&self) {
                self.0.terminated().await
            }
        }

        let (outcome, _) = process_struct_response(
            content(&[r#"{"steps": ["one", "#, r#""two", "three"]}"#]),
            Shared(state.clone()),
            Format::Json,
        )
        .await
        .unwrap();

        assert_eq!(outcome, StructOutcome::Terminated);
        assert!(*state.terminated.lock().await);
        assert_eq!(state.seen.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_nothing_parsed_is_an_error() {
        let err = process_struct_response::<MathProblem, _, _>(
            content(&["I cannot answer that."]),
            Collector::default(),
            Format::Json,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CallstreamError::NoStructuredResponse));
    }
}
