//! Dispatch engine
//!
//! The [`Router`] is the single reader of a session: it owns every argument
//! channel, starts one handler task per target on first sight and joins them
//! all when the events run out.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::diff::Preprocessor;
use crate::error::{ArgumentError, CallstreamError, Result, TargetFailure};
use crate::parser::ParseState;
use crate::record::CallEvent;

use super::channel::{ArgumentChannel, Arguments};
use super::target::{Invocation, Registry};

/// Session state machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Nothing routed yet
    #[default]
    Idle,
    /// Events being read and routed
    Streaming,
    /// End markers sent, handlers still consuming
    Draining,
    /// All handlers finished
    Joined,
}

impl SessionState {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Streaming => "streaming",
            SessionState::Draining => "draining",
            SessionState::Joined => "joined",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Joined)
    }

    /// Check if the session may move to `next`.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Idle, SessionState::Streaming)
                | (SessionState::Idle, SessionState::Draining)
                | (SessionState::Streaming, SessionState::Draining)
                | (SessionState::Draining, SessionState::Joined)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Channels of one target, plus its argument streams until the handler starts
struct Lane {
    channels: BTreeMap<String, ArgumentChannel>,
    args: Option<Arguments>,
}

/// Routes call events onto argument channels.
pub(crate) struct Router<'r, C> {
    registry: &'r Registry<C>,
    context: Option<Arc<C>>,
    lanes: HashMap<String, Lane>,
    running: Vec<(String, JoinHandle<eyre::Result<()>>)>,
    failures: Vec<TargetFailure>,
    state: SessionState,
}

impl<'r, C: Send + Sync + 'static> Router<'r, C> {
    /// Create a router with channels for every registered target.
    ///
    /// Fails before anything is read if a target needs a missing context.
    pub(crate) fn new(registry: &'r Registry<C>, context: Option<Arc<C>>) -> Result<Self> {
        registry.check_context(context.is_some())?;

        let lanes = registry
            .iter()
            .map(|target| {
                let (channels, streams): (BTreeMap<_, _>, Vec<_>) = target
                    .parameters
                    .iter()
                    .map(|parameter| {
                        let (channel, stream) = ArgumentChannel::new(&target.name, parameter.clone());
                        ((parameter.name.clone(), channel), stream)
                    })
                    .unzip();
                let lane = Lane {
                    channels,
                    args: Some(Arguments::new(target.name.clone(), streams)),
                };
                (target.name.clone(), lane)
            })
            .collect();

        Ok(Self {
            registry,
            context,
            lanes,
            running: Vec::new(),
            failures: Vec::new(),
            state: SessionState::Idle,
        })
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = %self.state, to = %next, "Invalid session transition ignored");
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "Session state changed");
        self.state = next;
    }

    /// Start the target's handler unless it already runs.
    pub(crate) fn start(&mut self, name: &str) -> Result<()> {
        let registry = self.registry;
        let target = registry
            .get(name)
            .ok_or_else(|| CallstreamError::UnknownTarget(name.to_string()))?;
        self.transition(SessionState::Streaming);

        let Some(args) = self.lanes.get_mut(name).and_then(|lane| lane.args.take()) else {
            return Ok(());
        };

        let context = if target.requires_context {
            self.context.clone()
        } else {
            None
        };
        let invocation = Invocation {
            target: name.to_string(),
            context,
            args,
        };
        let handler = target.handler();

        tracing::debug!(function = %name, "Starting handler");
        let handle = tokio::spawn(async move { handler.call(invocation).await });
        self.running.push((name.to_string(), handle));
        Ok(())
    }

    /// Route one event's deltas. Unknown targets and parameters are fatal.
    pub(crate) fn route(&mut self, event: CallEvent) -> Result<()> {
        let registry = self.registry;
        let target = registry
            .get(&event.target)
            .ok_or_else(|| CallstreamError::UnknownTarget(event.target.clone()))?;
        if let Some(parameter) = event.arguments.keys().find(|k| target.parameter(k).is_none()) {
            return Err(CallstreamError::UnknownParameter {
                target: event.target.clone(),
                parameter: parameter.clone(),
            });
        }

        self.start(&event.target)?;

        let Some(lane) = self.lanes.get_mut(&event.target) else {
            return Ok(());
        };
        for (parameter, delta) in event.arguments {
            if let Some(channel) = lane.channels.get_mut(&parameter)
                && let Err(e) = channel.push(delta)
            {
                tracing::warn!(function = %event.target, parameter = %parameter, error = %e, "Value rejected");
                self.failures.push(TargetFailure::Argument(e));
            }
        }
        // Scalars wait for a finished value; `Unknown` snapshots may still grow
        if event.state == ParseState::Complete {
            for channel in lane.channels.values_mut() {
                if let Err(e) = channel.flush() {
                    self.failures.push(TargetFailure::Argument(e));
                }
            }
        }
        Ok(())
    }

    /// Record a failure of one target and end delivery on its channels.
    pub(crate) fn fail_target(&mut self, failure: TargetFailure) -> Result<()> {
        let name = failure.target().to_string();
        self.start(&name)?;

        let message = match &failure {
            TargetFailure::Parser { message, .. } => message.clone(),
            other => other.to_string(),
        };
        if let Some(lane) = self.lanes.get_mut(&name) {
            let error = ArgumentError::Parse {
                target: name.clone(),
                message,
            };
            for channel in lane.channels.values_mut() {
                channel.fail(error.clone());
            }
        }
        self.failures.push(failure);
        Ok(())
    }

    /// Close every channel and join all handlers.
    ///
    /// Any value, parser or handler failure turns the result into [`CallstreamError::Failed`].
    pub(crate) async fn finish(mut self) -> Result<BTreeSet<String>> {
        self.close_all();
        let invoked = self.join().await;
        if self.failures.is_empty() {
            Ok(invoked)
        } else {
            Err(CallstreamError::Failed {
                invoked,
                failures: self.failures,
            })
        }
    }

    /// Release every started handler, then hand back `error`.
    pub(crate) async fn abort(mut self, error: CallstreamError) -> CallstreamError {
        tracing::warn!(error = %error, "Aborting session");
        self.close_all();
        let invoked = self.join().await;
        tracing::debug!(
            invoked = invoked.len(),
            failures = self.failures.len(),
            "Released handlers of aborted session"
        );
        error
    }

    fn close_all(&mut self) {
        self.transition(SessionState::Draining);
        for lane in self.lanes.values_mut() {
            for channel in lane.channels.values_mut() {
                if let Err(e) = channel.close() {
                    self.failures.push(TargetFailure::Argument(e));
                }
            }
        }
    }

    async fn join(&mut self) -> BTreeSet<String> {
        let mut invoked = BTreeSet::new();
        for (name, handle) in self.running.drain(..) {
            match handle.await {
                Ok(Ok(())) => tracing::debug!(function = %name, "Handler finished"),
                Ok(Err(e)) => {
                    tracing::error!(function = %name, error = %e, "Handler failed");
                    self.failures.push(TargetFailure::Handler {
                        target: name.clone(),
                        message: format!("{:#}", e),
                    });
                }
                Err(e) => {
                    tracing::error!(function = %name, error = ?e, "Handler task panicked");
                    self.failures.push(TargetFailure::Handler {
                        target: name.clone(),
                        message: e.to_string(),
                    });
                }
            }
            invoked.insert(name);
        }
        self.transition(SessionState::Joined);
        invoked
    }
}

/// Dispatch already-demuxed call events to the registered targets.
///
/// Each event's arguments go through `preprocessor` before routing. Returns the
/// names of the targets whose handlers were started.
pub async fn dispatch<C, S, P>(
    events: S,
    registry: &Registry<C>,
    mut preprocessor: P,
    context: Option<Arc<C>>,
) -> Result<BTreeSet<String>>
where
    C: Send + Sync + 'static,
    S: Stream<Item = CallEvent>,
    P: Preprocessor,
{
    let mut router = Router::new(registry, context)?;
    let mut events = std::pin::pin!(events);

    while let Some(event) = events.next().await {
        let arguments = preprocessor.preprocess(&event.target, event.arguments);
        let event = CallEvent { arguments, ..event };
        if let Err(e) = router.route(event) {
            return Err(router.abort(e).await);
        }
    }

    router.finish().await
}
