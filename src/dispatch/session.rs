//! Dispatch session
//!
//! Binds one raw message stream to one registry: raw messages are demuxed,
//! classified into the result record, diffed and routed.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::{Stream, StreamExt};

use crate::demux::{DemuxItem, demux};
use crate::diff::{DiffPreprocessor, Preprocessor};
use crate::error::{Result, TargetFailure};
use crate::parser::Format;
use crate::record::{CallEvent, RecordBuilder, ResultRecord};
use crate::stream::RawMessage;

use super::engine::Router;
use super::target::Registry;

/// Outcome of a successful session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    /// Targets whose handlers were started
    pub invoked: BTreeSet<String>,
    /// The assistant turn assembled from the stream
    pub record: ResultRecord,
}

/// One dispatch over one raw stream
pub struct DispatchSession<C = ()> {
    registry: Registry<C>,
    context: Option<Arc<C>>,
    format: Format,
}

impl<C: Send + Sync + 'static> DispatchSession<C> {
    pub fn new(registry: Registry<C>) -> Self {
        Self {
            registry,
            context: None,
            format: Format::default(),
        }
    }

    /// Shared context handed to context-bound targets
    pub fn with_context(mut self, context: Arc<C>) -> Self {
        self.context = Some(context);
        self
    }

    /// Serialization format of the call arguments
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn registry(&self) -> &Registry<C> {
        &self.registry
    }

    /// Consume `messages` and dispatch every call in it.
    ///
    /// Configuration errors are returned before the stream is polled. Protocol
    /// errors abort the session after every started handler is released.
    pub async fn run<S>(self, messages: S) -> Result<Dispatched>
    where
        S: Stream<Item = RawMessage> + Send,
    {
        let mut router = Router::new(&self.registry, self.context.clone())?;

        let content_target = self.registry.content_target().map(str::to_string);
        let mut records = RecordBuilder::new(self.registry.content_slot());
        let mut diff = DiffPreprocessor::new(content_target.clone());

        let items = demux(Box::pin(messages), self.format, content_target);
        let mut items = std::pin::pin!(items);

        while let Some(item) = items.next().await {
            let step = match item {
                Ok(DemuxItem::CallStarted(name)) => router.start(&name),
                Ok(DemuxItem::Event(event)) => match records.classify(event) {
                    Ok(Some(call)) => {
                        let arguments = diff.preprocess(&call.target, call.arguments);
                        router.route(CallEvent { arguments, ..call })
                    }
                    Ok(None) => Ok(()),
                    Err(failure) => router.fail_target(failure),
                },
                Ok(DemuxItem::ParseFailure { target, error }) => router.fail_target(TargetFailure::Parser {
                    target,
                    message: error.message,
                }),
                Err(e) => Err(e),
            };
            if let Err(e) = step {
                return Err(router.abort(e).await);
            }
        }

        let invoked = router.finish().await?;
        tracing::info!(invoked = invoked.len(), "Dispatch session joined");
        Ok(Dispatched {
            invoked,
            record: records.finish(),
        })
    }
}
