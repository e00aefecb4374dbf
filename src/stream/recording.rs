//! Recorded stream logs.
//!
//! A log is either a JSON array of chunks or raw Server-Sent Events text:
//! ```text
//! data: {"choices": [{"delta": {"content": "Hi"}}]}
//!
//! data: [DONE]
//! ```

use crate::error::Result;

use super::chunk::ChatCompletionChunk;

/// Parse a recorded log into chunks.
pub fn load_log(text: &str) -> Result<Vec<ChatCompletionChunk>> {
    if text.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(text)?);
    }

    let mut chunks = Vec::new();
    for line in text.lines() {
        if let Some(chunk) = parse_sse_line(line)? {
            chunks.push(chunk);
        }
    }
    Ok(chunks)
}

/// Parse one SSE line. Non-data lines, blank payloads and `[DONE]` yield `None`.
pub fn parse_sse_line(line: &str) -> Result<Option<ChatCompletionChunk>> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(data)?))
}

/// Render a log the way a reader would want to skim it: content prefixed
/// with `> `, calls as `name(arguments)`.
pub fn render_log(chunks: &[ChatCompletionChunk]) -> String {
    let mut out = String::new();
    let mut in_content = false;

    for chunk in chunks {
        let Some(choice) = chunk.choices.first() else {
            continue;
        };

        if let Some(delta) = &choice.delta {
            if let Some(content) = delta.content.as_deref()
                && !content.is_empty()
            {
                if !in_content {
                    out.push_str("> ");
                    in_content = true;
                }
                out.push_str(content);
            }

            let call = delta
                .function_call
                .as_ref()
                .or_else(|| delta.tool_calls.as_ref().and_then(|c| c.first()).and_then(|c| c.function.as_ref()));
            if let Some(call) = call {
                if in_content {
                    in_content = false;
                    out.push_str("\n\n");
                }
                if let Some(name) = &call.name {
                    out.push_str(name);
                    out.push_str("(\n");
                }
                if let Some(arguments) = &call.arguments {
                    out.push_str(arguments);
                }
            }
        }

        if choice.finish_reason.is_some_and(|r| r.ends_call()) {
            out.push_str(")\n");
        }
    }

    out
}
