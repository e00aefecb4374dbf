//! Replay of recorded stream logs.
//!
//! Every function called in the log gets a printing handler with one stream
//! parameter per argument key found in its complete argument text.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use colored::*;
use eyre::{Context, Result};
use futures::StreamExt;
use log::{debug, info, warn};
use serde_json::Value;

use callstream::{
    ChatCompletionChunk, DispatchSession, Format, Handler, Invocation, RawMessage, Registry, Target, ValueType,
    load_log, render_log,
};

/// Parameter name of the synthesized content target
const CONTENT_PARAMETER: &str = "text";

/// Options for a single replay run
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub format: Format,
    pub content_target: Option<String>,
    pub show_record: bool,
}

/// Read and decode a log file
pub fn read_log(path: &Path) -> Result<Vec<ChatCompletionChunk>> {
    let text = fs::read_to_string(path).context(format!("Failed to read log {}", path.display()))?;
    let chunks = load_log(&text).context(format!("Failed to decode log {}", path.display()))?;
    debug!("Loaded {} chunks from {}", chunks.len(), path.display());
    Ok(chunks)
}

/// Collect every called function with the argument keys of its complete argument text
pub fn discover_calls(chunks: &[ChatCompletionChunk], format: Format) -> BTreeMap<String, BTreeSet<String>> {
    let mut calls: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut current: Option<(String, String)> = None;

    for message in chunks.iter().cloned().map(RawMessage::from) {
        if let Some(delta) = message.delta {
            if let Some(name) = delta.name.filter(|n| !n.is_empty()) {
                if let Some((name, text)) = current.take() {
                    record_keys(&mut calls, name, &text, format);
                }
                calls.entry(name.clone()).or_default();
                current = Some((name, String::new()));
            }
            if let Some(arguments) = delta.arguments
                && let Some((_, text)) = current.as_mut()
            {
                text.push_str(&arguments);
            }
        }
        if message.end_of_call
            && let Some((name, text)) = current.take()
        {
            record_keys(&mut calls, name, &text, format);
        }
    }
    if let Some((name, text)) = current.take() {
        record_keys(&mut calls, name, &text, format);
    }
    calls
}

fn record_keys(calls: &mut BTreeMap<String, BTreeSet<String>>, name: String, text: &str, format: Format) {
    if text.trim().is_empty() {
        return;
    }
    match format.parse_complete(text) {
        Ok(Value::Object(map)) => calls.entry(name).or_default().extend(map.keys().cloned()),
        Ok(other) => warn!("Arguments of {} are not an object: {}", name, other),
        Err(e) => warn!("Arguments of {} do not parse: {}", name, e),
    }
}

/// Build a registry of printing handlers for the discovered calls
pub fn build_registry(
    calls: &BTreeMap<String, BTreeSet<String>>,
    content_target: Option<&str>,
) -> callstream::Result<Registry> {
    let mut registry = Registry::new();
    for (name, parameters) in calls {
        let target = parameters
            .iter()
            .fold(Target::new(name.clone(), PrintHandler), |target, parameter| {
                target.stream(parameter.clone(), ValueType::Any)
            });
        registry.register(target)?;
    }
    if let Some(name) = content_target {
        if calls.contains_key(name) {
            warn!("Content target {} is also a called function, content will not be routed", name);
        } else {
            registry.register_content(
                Target::new(name, PrintHandler).stream(CONTENT_PARAMETER, ValueType::String),
            )?;
        }
    }
    Ok(registry)
}

/// Prints every delta a target receives
struct PrintHandler;

#[async_trait]
impl Handler for PrintHandler {
    async fn call(&self, invocation: Invocation) -> Result<()> {
        let target = invocation.target;
        println!("{} {}", "call".green(), target.bold());

        let streams = invocation.args.into_streams().map(|stream| {
            let parameter = stream.name().to_string();
            stream.map(move |value| (parameter.clone(), value))
        });
        let mut merged = futures::stream::select_all(streams);
        while let Some((parameter, value)) = merged.next().await {
            let value = value?;
            println!("  {}.{} {}", target.cyan(), parameter.yellow(), render_value(&value));
        }
        Ok(())
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => format!("{:?}", text),
        other => other.to_string(),
    }
}

/// Replay a log through printing handlers
pub async fn replay(path: &Path, options: &ReplayOptions) -> Result<()> {
    let chunks = read_log(path)?;
    let calls = discover_calls(&chunks, options.format);
    let registry = build_registry(&calls, options.content_target.as_deref())?;
    if registry.is_empty() {
        warn!("{} holds no calls and no content target is configured", path.display());
    }
    info!(
        "Replaying {} with {} targets: {:?}",
        path.display(),
        registry.len(),
        registry.names().collect::<Vec<_>>()
    );

    let messages = futures::stream::iter(chunks.into_iter().map(RawMessage::from));
    let dispatched = DispatchSession::new(registry)
        .with_format(options.format)
        .run(messages)
        .await
        .context("Dispatch failed")?;

    let invoked: Vec<&str> = dispatched.invoked.iter().map(String::as_str).collect();
    println!("{} {}", "Invoked:".green(), invoked.join(", "));
    if options.show_record {
        println!("{}", serde_json::to_string_pretty(&dispatched.record)?);
    }
    Ok(())
}

/// Print a log as plain text
pub fn print(path: &Path) -> Result<()> {
    let chunks = read_log(path)?;
    print!("{}", render_log(&chunks));
    Ok(())
}
