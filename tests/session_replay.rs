//! Session integration tests
//!
//! Replays recorded stream logs through a registry and checks what the
//! handlers saw and the assembled result record.

use std::sync::Arc;

use async_trait::async_trait;
use callstream::{
    CallstreamError, DispatchSession, Handler, Invocation, RawMessage, Registry, Target, TargetFailure, ValueType,
    load_log, render_log,
};
use tokio::sync::Mutex;

const SSE_LOG: &str = r#"
data: {"choices":[{"index":0,"delta":{"role":"assistant","content":null}}]}

data: {"choices":[{"index":0,"delta":{"content":"Let me check."}}]}

data: {"choices":[{"index":0,"delta":{"function_call":{"name":"error_message","arguments":""}}}]}

data: {"choices":[{"index":0,"delta":{"function_call":{"arguments":"{\"typ\": \"forbid"}}}]}

data: {"choices":[{"index":0,"delta":{"function_call":{"arguments":"den\", \"description\": \"I'm sorry, "}}}]}

data: {"choices":[{"index":0,"delta":{"function_call":{"arguments":"but I cannot disclose my code.\"}"}}}]}

data: {"choices":[{"index":0,"delta":{},"finish_reason":"function_call"}]}

data: [DONE]
"#;

#[derive(Clone, Default)]
struct Output(Arc<Mutex<Vec<String>>>);

impl Output {
    async fn lines(&self) -> Vec<String> {
        self.0.lock().await.clone()
    }
}

/// Formats the error it is called with once both arguments have arrived
struct ErrorMessage(Output);

#[async_trait]
impl Handler for ErrorMessage {
    async fn call(&self, invocation: Invocation) -> eyre::Result<()> {
        let mut args = invocation.args;
        let typ = args.take("typ")?.collect_string().await?;
        let description = args.take("description")?.collect_string().await?;
        self.0.0.lock().await.push(format!("Error: {} - {}", typ, description));
        Ok(())
    }
}

/// Collects content text
struct Speak(Output);

#[async_trait]
impl Handler for Speak {
    async fn call(&self, invocation: Invocation) -> eyre::Result<()> {
        let mut args = invocation.args;
        let text = args.take("text")?.collect_string().await?;
        self.0.0.lock().await.push(text);
        Ok(())
    }
}

fn registry(errors: &Output, content: &Output) -> Registry {
    let mut registry = Registry::new();
    registry
        .register(
            Target::new("error_message", ErrorMessage(errors.clone()))
                .stream("typ", ValueType::String)
                .stream("description", ValueType::String),
        )
        .unwrap();
    registry
        .register_content(Target::new("content", Speak(content.clone())).stream("text", ValueType::String))
        .unwrap();
    registry
}

fn messages(log: &str) -> impl futures::Stream<Item = RawMessage> + Send {
    let chunks = load_log(log).unwrap();
    futures::stream::iter(chunks.into_iter().map(RawMessage::from))
}

#[tokio::test]
async fn test_replay_sse_log() {
    let errors = Output::default();
    let content = Output::default();

    let dispatched = DispatchSession::new(registry(&errors, &content))
        .run(messages(SSE_LOG))
        .await
        .unwrap();

    assert_eq!(
        errors.lines().await,
        vec!["Error: forbidden - I'm sorry, but I cannot disclose my code."]
    );
    assert_eq!(content.lines().await, vec!["Let me check."]);

    let invoked: Vec<_> = dispatched.invoked.iter().cloned().collect();
    assert_eq!(invoked, vec!["content", "error_message"]);

    let record = dispatched.record;
    assert_eq!(record.role, "assistant");
    assert_eq!(record.content.as_deref(), Some("Let me check."));
    let call = record.function_call.unwrap();
    assert_eq!(call.name, "error_message");
    let arguments: serde_json::Value = serde_json::from_str(&call.arguments).unwrap();
    assert_eq!(arguments["typ"], "forbidden");
    assert_eq!(arguments["description"], "I'm sorry, but I cannot disclose my code.");
}

#[tokio::test]
async fn test_replay_json_array_log() {
    let log = r#"[
        {"choices": [{"delta": {"function_call": {"name": "error_message"}}}]},
        {"choices": [{"delta": {"function_call": {"arguments": "{\"typ\": \"busy\", \"description\": \"later\"}"}}}]},
        {"choices": [{"delta": {}, "finish_reason": "function_call"}]}
    ]"#;
    let errors = Output::default();
    let content = Output::default();

    let dispatched = DispatchSession::new(registry(&errors, &content))
        .run(messages(log))
        .await
        .unwrap();

    assert_eq!(errors.lines().await, vec!["Error: busy - later"]);
    assert!(content.lines().await.is_empty());
    assert!(dispatched.record.content.is_none());
}

#[tokio::test]
async fn test_unregistered_call_fails_the_session() {
    let log = r#"[
        {"choices": [{"delta": {"function_call": {"name": "launch_rockets", "arguments": "{}"}}}]}
    ]"#;
    let errors = Output::default();
    let content = Output::default();

    let err = DispatchSession::new(registry(&errors, &content))
        .run(messages(log))
        .await
        .unwrap_err();
    assert!(matches!(err, CallstreamError::UnknownTarget(ref name) if name == "launch_rockets"));
}

#[tokio::test]
async fn test_type_violation_reports_target() {
    let log = r#"[
        {"choices": [{"delta": {"function_call": {"name": "error_message"}}}]},
        {"choices": [{"delta": {"function_call": {"arguments": "{\"typ\": 404, \"description\": \"gone\"}"}}}]},
        {"choices": [{"delta": {}, "finish_reason": "function_call"}]}
    ]"#;
    let errors = Output::default();
    let content = Output::default();

    let err = DispatchSession::new(registry(&errors, &content))
        .run(messages(log))
        .await
        .unwrap_err();
    let CallstreamError::Failed { invoked, failures } = err else {
        panic!("expected a failed session");
    };
    assert!(invoked.contains("error_message"));
    assert!(failures.iter().all(|f| f.target() == "error_message"));
    assert!(failures.iter().any(|f| matches!(f, TargetFailure::Argument(_))));
}

#[test]
fn test_render_sse_log() {
    let chunks = load_log(SSE_LOG).unwrap();
    let rendered = render_log(&chunks);
    assert!(rendered.starts_with("> Let me check."));
    assert!(rendered.contains("error_message(\n"));
    assert!(rendered.trim_end().ends_with(')'));
}
