//! Message demuxer.
//!
//! Walks raw upstream messages, tracks which call is currently receiving
//! argument text and relabels parser output as `(target, state, fragment)`
//! events. Plain content text becomes its own implicit target.

use std::collections::VecDeque;

use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::error::{CallstreamError, Result};
use crate::parser::{Format, IncrementalParser, ParseError, ParseState};
use crate::stream::RawMessage;

/// A parser emission labeled with the target it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct DemuxEvent {
    /// Target name, `None` for content when no content target is registered
    pub target: Option<String>,
    /// Completeness of `fragment`
    pub state: ParseState,
    /// Argument snapshot, or the verbatim text for content
    pub fragment: Value,
}

type ParseResult = std::result::Result<Vec<(ParseState, Value)>, ParseError>;

/// Output of the demuxer for one raw message
#[derive(Debug, Clone, PartialEq)]
pub enum DemuxItem {
    /// A call to `target` was named; its arguments follow
    CallStarted(String),
    Event(DemuxEvent),
    /// The target's argument text is unparseable; the rest of its arguments are dropped
    ParseFailure { target: String, error: ParseError },
}

/// State tracker turning raw messages into labeled events.
pub struct Demuxer {
    format: Format,
    content_target: Option<String>,
    current_target: Option<String>,
    parser: Option<Box<dyn IncrementalParser>>,
}

impl Demuxer {
    /// Create a demuxer. Content fragments are labeled with `content_target`.
    pub fn new(format: Format, content_target: Option<String>) -> Self {
        Self {
            format,
            content_target,
            current_target: None,
            parser: None,
        }
    }

    /// Target currently receiving argument text
    pub fn current_target(&self) -> Option<&str> {
        self.current_target.as_deref()
    }

    /// Process one raw message and return the items it produced.
    pub fn process(&mut self, message: RawMessage) -> Result<Vec<DemuxItem>> {
        if message.delta.is_none() && !message.end_of_call {
            return Err(CallstreamError::MissingDelta);
        }

        let mut items = Vec::new();

        if let Some(delta) = message.delta {
            if let Some(name) = delta.name
                && !name.is_empty()
            {
                self.close_parser(&mut items);
                tracing::trace!(function = %name, "Call started");
                items.push(DemuxItem::CallStarted(name.clone()));
                self.current_target = Some(name);
                self.parser = Some(self.format.parser());
            }

            if let Some(arguments) = delta.arguments
                && !arguments.is_empty()
            {
                self.feed(&arguments, &mut items);
            }

            if let Some(content) = delta.content
                && !content.is_empty()
            {
                items.push(DemuxItem::Event(DemuxEvent {
                    target: self.content_target.clone(),
                    state: ParseState::Partial,
                    fragment: Value::String(content),
                }));
            }
        }

        if message.end_of_call {
            items.extend(self.finish());
        }

        Ok(items)
    }

    /// Close the open call. Whatever the parser can still vouch for is
    /// returned; a value that never completed is discarded.
    pub fn finish(&mut self) -> Vec<DemuxItem> {
        let mut items = Vec::new();
        self.close_parser(&mut items);
        self.current_target = None;
        items
    }

    fn feed(&mut self, text: &str, items: &mut Vec<DemuxItem>) {
        let (Some(_), Some(parser)) = (&self.current_target, self.parser.as_mut()) else {
            tracing::debug!(len = text.len(), "Argument text outside of an open call dropped");
            return;
        };

        let result = parser.feed(text);
        self.emit(result, items);
    }

    fn emit(&mut self, result: ParseResult, items: &mut Vec<DemuxItem>) {
        let Some(target) = &self.current_target else {
            return;
        };
        match result {
            Ok(values) => {
                items.extend(values.into_iter().map(|(state, fragment)| {
                    DemuxItem::Event(DemuxEvent {
                        target: Some(target.clone()),
                        state,
                        fragment,
                    })
                }));
            }
            Err(error) => {
                tracing::warn!(function = %target, error = %error, "Unparseable arguments");
                items.push(DemuxItem::ParseFailure {
                    target: target.clone(),
                    error,
                });
                self.parser = None;
            }
        }
    }

    fn close_parser(&mut self, items: &mut Vec<DemuxItem>) {
        if let Some(mut parser) = self.parser.take() {
            let result = parser.flush();
            parser.close();
            self.emit(result, items);
        }
    }
}

struct DemuxState<S> {
    messages: S,
    demuxer: Demuxer,
    pending: VecDeque<DemuxItem>,
    done: bool,
}

/// Lazily demux a stream of raw messages. The stream ends after the first
/// protocol error.
pub fn demux<S>(messages: S, format: Format, content_target: Option<String>) -> impl Stream<Item = Result<DemuxItem>>
where
    S: Stream<Item = RawMessage> + Unpin,
{
    let state = DemuxState {
        messages,
        demuxer: Demuxer::new(format, content_target),
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((Ok(item), state));
            }
            if state.done {
                return None;
            }
            let Some(message) = state.messages.next().await else {
                state.done = true;
                let items = state.demuxer.finish();
                state.pending.extend(items);
                continue;
            };
            match state.demuxer.process(message) {
                Ok(items) => state.pending.extend(items),
                Err(e) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn started(target: &str) -> DemuxItem {
        DemuxItem::CallStarted(target.to_string())
    }

    fn event(target: &str, state: ParseState, fragment: Value) -> DemuxItem {
        DemuxItem::Event(DemuxEvent {
            target: Some(target.to_string()),
            state,
            fragment,
        })
    }

    fn run(demuxer: &mut Demuxer, messages: Vec<RawMessage>) -> Vec<DemuxItem> {
        messages
            .into_iter()
            .flat_map(|m| demuxer.process(m).unwrap())
            .collect()
    }

    #[test]
    fn test_arguments_labeled_with_current_target() {
        let mut demuxer = Demuxer::new(Format::Json, None);
        let items = run(
            &mut demuxer,
            vec![
                RawMessage::name("f"),
                RawMessage::arguments(r#"{"a":"hel"#),
                RawMessage::arguments(r#"lo"}"#),
                RawMessage::end(),
            ],
        );
        assert_eq!(
            items,
            vec![
                started("f"),
                event("f", ParseState::Partial, json!({"a": "hel"})),
                event("f", ParseState::Complete, json!({"a": "hello"})),
            ]
        );
        assert_eq!(demuxer.current_target(), None);
    }

    #[test]
    fn test_content_labeled_with_content_target() {
        let mut demuxer = Demuxer::new(Format::Json, Some("content".to_string()));
        let items = run(&mut demuxer, vec![RawMessage::content("note")]);
        assert_eq!(items, vec![event("content", ParseState::Partial, json!("note"))]);
    }

    #[test]
    fn test_content_without_content_target() {
        let mut demuxer = Demuxer::new(Format::Json, None);
        let items = run(&mut demuxer, vec![RawMessage::content("note")]);
        assert_eq!(
            items,
            vec![DemuxItem::Event(DemuxEvent {
                target: None,
                state: ParseState::Partial,
                fragment: json!("note"),
            })]
        );
    }

    #[test]
    fn test_empty_content_filtered() {
        let mut demuxer = Demuxer::new(Format::Json, Some("content".to_string()));
        assert!(demuxer.process(RawMessage::content("")).unwrap().is_empty());
    }

    #[test]
    fn test_missing_delta_is_an_error() {
        let mut demuxer = Demuxer::new(Format::Json, None);
        let err = demuxer.process(RawMessage::default()).unwrap_err();
        assert!(matches!(err, CallstreamError::MissingDelta));
    }

    #[test]
    fn test_end_marker_without_delta_is_accepted() {
        let mut demuxer = Demuxer::new(Format::Json, None);
        let message = RawMessage {
            delta: None,
            end_of_call: true,
        };
        assert!(demuxer.process(message).unwrap().is_empty());
    }

    #[test]
    fn test_new_name_discards_unfinished_value() {
        let mut demuxer = Demuxer::new(Format::Json, None);
        let items = run(
            &mut demuxer,
            vec![
                RawMessage::name("f"),
                RawMessage::arguments(r#"{"a":"x"#),
                RawMessage::name("g"),
                RawMessage::arguments(" 1}"),
                RawMessage::arguments(r#"{"b":1}"#),
            ],
        );
        assert_eq!(
            items,
            vec![
                started("f"),
                event("f", ParseState::Partial, json!({"a": "x"})),
                started("g"),
                event("g", ParseState::Complete, json!({"b": 1})),
            ]
        );
        assert_eq!(demuxer.current_target(), Some("g"));
    }

    #[test]
    fn test_parse_failure_stops_target_arguments() {
        let mut demuxer = Demuxer::new(Format::Json, None);
        let items = run(
            &mut demuxer,
            vec![
                RawMessage::name("f"),
                RawMessage::arguments(r#"{"a" oops"#),
                RawMessage::arguments(r#"{"a":"x"}"#),
            ],
        );
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], started("f"));
        assert!(matches!(&items[1], DemuxItem::ParseFailure { target, .. } if target == "f"));
    }

    #[test]
    fn test_repeated_name_restarts_call() {
        let mut demuxer = Demuxer::new(Format::Json, None);
        let items = run(
            &mut demuxer,
            vec![RawMessage::name("f"), RawMessage::end(), RawMessage::name("f")],
        );
        assert_eq!(items, vec![started("f"), started("f")]);
    }

    #[test]
    fn test_arguments_without_call_dropped() {
        let mut demuxer = Demuxer::new(Format::Json, None);
        assert!(demuxer.process(RawMessage::arguments(r#"{"a":1}"#)).unwrap().is_empty());
    }

    #[test]
    fn test_yaml_format_reports_unknown() {
        let mut demuxer = Demuxer::new(Format::Yaml, None);
        let items = run(&mut demuxer, vec![RawMessage::name("f"), RawMessage::arguments("a: b\n")]);
        assert_eq!(
            items,
            vec![started("f"), event("f", ParseState::Unknown, json!({"a": "b"}))]
        );
    }

    #[test]
    fn test_yaml_tail_released_at_end_of_call() {
        let mut demuxer = Demuxer::new(Format::Yaml, None);
        let items = run(
            &mut demuxer,
            vec![
                RawMessage::name("f"),
                RawMessage::arguments("a: b\nc: d"),
                RawMessage::end(),
            ],
        );
        assert_eq!(
            items,
            vec![
                started("f"),
                event("f", ParseState::Unknown, json!({"a": "b"})),
                event("f", ParseState::Unknown, json!({"a": "b", "c": "d"})),
            ]
        );
    }

    #[tokio::test]
    async fn test_yaml_tail_released_at_end_of_stream() {
        let messages = futures::stream::iter(vec![RawMessage::name("f"), RawMessage::arguments("a: b")]);
        let items: Vec<_> = demux(messages, Format::Yaml, None)
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(
            items,
            vec![started("f"), event("f", ParseState::Unknown, json!({"a": "b"}))]
        );
    }

    #[tokio::test]
    async fn test_demux_stream_is_lazy_and_stops_on_error() {
        let messages = futures::stream::iter(vec![
            RawMessage::name("f"),
            RawMessage::arguments(r#"{"a":1}"#),
            RawMessage::default(),
            RawMessage::content("never"),
        ]);
        let items: Vec<_> = demux(messages, Format::Json, None).collect().await;
        assert_eq!(items.len(), 3);
        assert!(items[..2].iter().all(|item| item.is_ok()));
        assert!(matches!(items[2], Err(CallstreamError::MissingDelta)));
    }
}
