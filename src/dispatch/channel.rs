//! Per-parameter argument channels
//!
//! The router owns the sending half of every channel; the handler of the
//! target reads the receiving half as an [`ArgStream`]. Each channel carries
//! exactly one end marker, always last.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::diff::merge_delta;
use crate::error::ArgumentError;

use super::target::{ParamKind, Parameter, ValueType};

#[derive(Debug)]
enum Slot {
    Value(Value),
    Failed(ArgumentError),
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelStatus {
    Open,
    Failed,
    Closed,
}

/// Sending half of one (target, parameter) channel
#[derive(Debug)]
pub(crate) struct ArgumentChannel {
    target: String,
    parameter: Parameter,
    tx: mpsc::UnboundedSender<Slot>,
    pending: Option<Value>,
    status: ChannelStatus,
}

impl ArgumentChannel {
    pub(crate) fn new(target: &str, parameter: Parameter) -> (Self, ArgStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = ArgStream {
            parameter: parameter.name.clone(),
            rx,
            done: false,
        };
        let channel = Self {
            target: target.to_string(),
            parameter,
            tx,
            pending: None,
            status: ChannelStatus::Open,
        };
        (channel, stream)
    }

    /// Enqueue a delta. Stream parameters check and deliver it now, scalar
    /// parameters merge it until [`flush`](Self::flush).
    pub(crate) fn push(&mut self, delta: Value) -> Result<(), ArgumentError> {
        if self.status != ChannelStatus::Open {
            return Ok(());
        }
        match self.parameter.kind {
            ParamKind::Stream => {
                self.check(&delta)?;
                self.send(Slot::Value(delta));
            }
            ParamKind::Scalar => merge_delta(&mut self.pending, delta),
        }
        Ok(())
    }

    /// Deliver a merged scalar value, if one is waiting
    pub(crate) fn flush(&mut self) -> Result<(), ArgumentError> {
        if self.status != ChannelStatus::Open {
            return Ok(());
        }
        let Some(value) = self.pending.take() else {
            return Ok(());
        };
        self.check(&value)?;
        self.send(Slot::Value(value));
        Ok(())
    }

    /// Report `error` to the reader and stop further delivery
    pub(crate) fn fail(&mut self, error: ArgumentError) {
        if self.status != ChannelStatus::Open {
            return;
        }
        tracing::debug!(function = %self.target, parameter = %self.parameter.name, error = %error, "Channel failed");
        self.pending = None;
        self.send(Slot::Failed(error));
        self.status = ChannelStatus::Failed;
    }

    /// Flush and enqueue the end marker. Idempotent.
    pub(crate) fn close(&mut self) -> Result<(), ArgumentError> {
        if self.status == ChannelStatus::Closed {
            return Ok(());
        }
        let flushed = self.flush();
        let _ = self.tx.send(Slot::End);
        self.status = ChannelStatus::Closed;
        flushed
    }

    fn check(&mut self, value: &Value) -> Result<(), ArgumentError> {
        if self.parameter.ty.check(value) {
            return Ok(());
        }
        let error = ArgumentError::TypeMismatch {
            target: self.target.clone(),
            parameter: self.parameter.name.clone(),
            expected: self.parameter.ty.to_string(),
            found: ValueType::describe(value).to_string(),
        };
        self.fail(error.clone());
        Err(error)
    }

    fn send(&self, slot: Slot) {
        // The handler may drop a stream it does not read
        if self.tx.send(slot).is_err() {
            tracing::trace!(function = %self.target, parameter = %self.parameter.name, "Reader gone");
        }
    }
}

/// Lazily-filled sequence of values for one parameter.
///
/// Yields `Err` once if the parameter failed, then ends.
#[derive(Debug)]
pub struct ArgStream {
    parameter: String,
    rx: mpsc::UnboundedReceiver<Slot>,
    done: bool,
}

impl ArgStream {
    /// Name of the parameter this stream belongs to
    pub fn name(&self) -> &str {
        &self.parameter
    }

    /// Concatenate every delta into one string
    pub async fn collect_string(mut self) -> Result<String, ArgumentError> {
        let mut out = String::new();
        while let Some(value) = self.next().await {
            match value? {
                Value::String(s) => out.push_str(&s),
                other => out.push_str(&other.to_string()),
            }
        }
        Ok(out)
    }

    /// Merge every delta into the final value, `None` if nothing arrived
    pub async fn collect_value(mut self) -> Result<Option<Value>, ArgumentError> {
        let mut acc = None;
        while let Some(value) = self.next().await {
            merge_delta(&mut acc, value?);
        }
        Ok(acc)
    }
}

impl Stream for ArgStream {
    type Item = Result<Value, ArgumentError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Slot::Value(value))) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(Some(Slot::Failed(error))) => Poll::Ready(Some(Err(error))),
            Poll::Ready(Some(Slot::End)) | Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// The argument streams handed to one invocation
#[derive(Debug)]
pub struct Arguments {
    target: String,
    streams: BTreeMap<String, ArgStream>,
}

impl Arguments {
    pub(crate) fn new(target: impl Into<String>, streams: impl IntoIterator<Item = ArgStream>) -> Self {
        Self {
            target: target.into(),
            streams: streams.into_iter().map(|s| (s.parameter.clone(), s)).collect(),
        }
    }

    /// Take the stream of a declared parameter. Each stream can be taken once.
    pub fn take(&mut self, parameter: &str) -> Result<ArgStream, ArgumentError> {
        self.streams.remove(parameter).ok_or_else(|| ArgumentError::Undeclared {
            target: self.target.clone(),
            parameter: parameter.to_string(),
        })
    }

    /// Names of the streams not taken yet
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.streams.keys().map(String::as_str)
    }

    /// All remaining streams, ordered by parameter name
    pub fn into_streams(self) -> impl Iterator<Item = ArgStream> {
        self.streams.into_values()
    }
}
