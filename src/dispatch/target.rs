//! Target definitions and the registry
//!
//! A target is a named handler plus the parameters it declares. The registry
//! owns every target of a session and designates the optional content target.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CallstreamError, Result};
use crate::record::ContentSlot;

use super::channel::Arguments;

/// How a parameter receives its values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// Every delta is delivered as it arrives
    #[default]
    Stream,
    /// Deltas are merged and delivered once the call's arguments are complete
    Scalar,
}

/// Type expectation checked against every delivered value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    Any,
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ValueType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Whether `value` satisfies this type
    pub fn check(&self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    /// Name of the JSON type of `value`, for error messages
    pub fn describe(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(n) if n.is_f64() => "number",
            Value::Number(_) => "integer",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A declared parameter of a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub kind: ParamKind,
    #[serde(default)]
    pub ty: ValueType,
}

impl Parameter {
    pub fn new(name: impl Into<String>, kind: ParamKind, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            kind,
            ty,
        }
    }
}

/// Everything a handler receives when its target is first named
pub struct Invocation<C = ()> {
    /// Name of the invoked target
    pub target: String,
    /// Shared context, present for context-bound targets
    pub context: Option<Arc<C>>,
    /// One lazily-filled stream per declared parameter
    pub args: Arguments,
}

/// Trait for the code run when a target is invoked
#[async_trait]
pub trait Handler<C = ()>: Send + Sync {
    /// Consume the invocation's argument streams
    async fn call(&self, invocation: Invocation<C>) -> eyre::Result<()>;
}

#[async_trait]
impl<C, F, Fut> Handler<C> for F
where
    C: Send + Sync + 'static,
    F: Fn(Invocation<C>) -> Fut + Send + Sync,
    Fut: Future<Output = eyre::Result<()>> + Send,
{
    async fn call(&self, invocation: Invocation<C>) -> eyre::Result<()> {
        (self)(invocation).await
    }
}

/// A named handler with its declared parameters
pub struct Target<C = ()> {
    /// Target name, matched against names in the stream
    pub name: String,
    /// Declared parameters, in declaration order
    pub parameters: Vec<Parameter>,
    /// Whether the handler needs the shared context
    pub requires_context: bool,
    handler: Arc<dyn Handler<C>>,
}

impl<C: Send + Sync + 'static> Target<C> {
    /// Create a new target with no parameters
    pub fn new(name: impl Into<String>, handler: impl Handler<C> + 'static) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            requires_context: false,
            handler: Arc::new(handler),
        }
    }

    /// Declare a parameter that streams every delta
    pub fn stream(self, name: impl Into<String>, ty: ValueType) -> Self {
        self.with_parameter(Parameter::new(name, ParamKind::Stream, ty))
    }

    /// Declare a parameter delivered once, when complete
    pub fn scalar(self, name: impl Into<String>, ty: ValueType) -> Self {
        self.with_parameter(Parameter::new(name, ParamKind::Scalar, ty))
    }

    /// Declare a parameter; a parameter of the same name is replaced
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        match self.parameters.iter_mut().find(|p| p.name == parameter.name) {
            Some(existing) => *existing = parameter,
            None => self.parameters.push(parameter),
        }
        self
    }

    /// Mark the target as needing the shared context
    pub fn with_context(mut self) -> Self {
        self.requires_context = true;
        self
    }

    /// Look up a declared parameter
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub(crate) fn handler(&self) -> Arc<dyn Handler<C>> {
        Arc::clone(&self.handler)
    }
}

impl<C> fmt::Debug for Target<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("requires_context", &self.requires_context)
            .finish_non_exhaustive()
    }
}

/// The targets of one session
pub struct Registry<C = ()> {
    targets: BTreeMap<String, Target<C>>,
    content: Option<String>,
}

impl<C: Send + Sync + 'static> Registry<C> {
    pub fn new() -> Self {
        Self {
            targets: BTreeMap::new(),
            content: None,
        }
    }

    /// Register a target. Names must be unique.
    pub fn register(&mut self, target: Target<C>) -> Result<()> {
        if self.targets.contains_key(&target.name) {
            return Err(CallstreamError::DuplicateTarget(target.name));
        }
        tracing::debug!(function = %target.name, parameters = target.parameters.len(), "Target registered");
        self.targets.insert(target.name.clone(), target);
        Ok(())
    }

    /// Register the target that receives plain content text.
    ///
    /// It must declare exactly one stream parameter of type string or any.
    pub fn register_content(&mut self, target: Target<C>) -> Result<()> {
        if self.content.is_some() {
            return Err(CallstreamError::InvalidContentTarget(
                "a content target is already registered".to_string(),
            ));
        }
        let [parameter] = target.parameters.as_slice() else {
            return Err(CallstreamError::InvalidContentTarget(format!(
                "'{}' must declare exactly one parameter, found {}",
                target.name,
                target.parameters.len()
            )));
        };
        if parameter.kind != ParamKind::Stream || !matches!(parameter.ty, ValueType::String | ValueType::Any) {
            return Err(CallstreamError::InvalidContentTarget(format!(
                "'{}' parameter '{}' must be a string stream",
                target.name, parameter.name
            )));
        }

        let name = target.name.clone();
        self.register(target)?;
        self.content = Some(name);
        Ok(())
    }

    /// Look up a target by name
    pub fn get(&self, name: &str) -> Option<&Target<C>> {
        self.targets.get(name)
    }

    /// Registered target names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Target<C>> {
        self.targets.values()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Name of the content target, if any
    pub fn content_target(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Content target together with its single parameter
    pub fn content_slot(&self) -> Option<ContentSlot> {
        let target = self.get(self.content.as_deref()?)?;
        let parameter = target.parameters.first()?;
        Some(ContentSlot {
            target: target.name.clone(),
            parameter: parameter.name.clone(),
        })
    }

    /// Fail if any target needs a context that was not supplied
    pub fn check_context(&self, has_context: bool) -> Result<()> {
        if has_context {
            return Ok(());
        }
        match self.targets.values().find(|t| t.requires_context) {
            Some(target) => Err(CallstreamError::MissingContext(target.name.clone())),
            None => Ok(()),
        }
    }
}

impl<C: Send + Sync + 'static> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for Registry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("targets", &self.targets.values().collect::<Vec<_>>())
            .field("content", &self.content)
            .finish()
    }
}
