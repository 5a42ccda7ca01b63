//! Conversion of MCP tools and tool results into the shapes LLM APIs expect.
//!
//! The host exposes tools under `server__tool` names; this module turns that
//! catalogue into function specifications for OpenAI-style and
//! Anthropic-style APIs and formats tool results for sending back.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_json::{json, Value};

use crate::types::{Tool, ToolResult, NAMESPACE_SEPARATOR};

/// Target format of converted tool specifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolFormat {
    /// `{"type": "function", "function": {...}}`
    OpenAi,
    /// `{name, description, input_schema}`
    Anthropic,
    /// `{name, description, schema}`
    #[default]
    Generic,
}

impl fmt::Display for ToolFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolFormat::OpenAi => write!(f, "openai"),
            ToolFormat::Anthropic => write!(f, "anthropic"),
            ToolFormat::Generic => write!(f, "generic"),
        }
    }
}

impl FromStr for ToolFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(ToolFormat::OpenAi),
            "anthropic" | "claude" => Ok(ToolFormat::Anthropic),
            "generic" | "json" => Ok(ToolFormat::Generic),
            other => Err(format!("unknown tool format: {}", other)),
        }
    }
}

/// Split `server__name` on the first separator.
///
/// Returns `None` when there is no separator or either side is empty.
pub fn parse_namespaced(name: &str) -> Option<(&str, &str)> {
    let (server, rest) = name.split_once(NAMESPACE_SEPARATOR)?;
    if server.is_empty() || rest.is_empty() {
        return None;
    }
    Some((server, rest))
}

fn schema_of(tool: &Tool) -> Value {
    if tool.input_schema.is_null() {
        json!({"type": "object", "properties": {}})
    } else {
        tool.input_schema.clone()
    }
}

fn description_of(name: &str, tool: &Tool) -> String {
    tool.description
        .clone()
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| format!("Execute {}", name))
}

/// Convert one tool, exposed under `name`, into a function specification.
pub fn to_function_spec(name: &str, tool: &Tool, format: ToolFormat) -> Value {
    let description = description_of(name, tool);
    let schema = schema_of(tool);

    match format {
        ToolFormat::OpenAi => json!({
            "type": "function",
            "function": {
                "name": name,
                "description": description,
                "parameters": schema,
            }
        }),
        ToolFormat::Anthropic => json!({
            "name": name,
            "description": description,
            "input_schema": schema,
        }),
        ToolFormat::Generic => json!({
            "name": name,
            "description": description,
            "schema": schema,
        }),
    }
}

/// Convert a catalogue keyed by exposed name into function specifications.
pub fn to_function_specs(tools: &BTreeMap<String, Tool>, format: ToolFormat) -> Vec<Value> {
    tools
        .iter()
        .map(|(name, tool)| to_function_spec(name, tool, format))
        .collect()
}

/// Format a tool result as the message an LLM API expects back.
pub fn format_tool_result(result: &ToolResult, format: ToolFormat) -> Value {
    let text = result.text();

    match format {
        ToolFormat::OpenAi => json!({
            "tool_call_id": result.call_id,
            "role": "tool",
            "content": text,
        }),
        ToolFormat::Anthropic => {
            let content = if result.is_error {
                format!("Error: {}", text)
            } else {
                text
            };
            json!({
                "type": "tool_result",
                "tool_use_id": result.call_id,
                "content": content,
                "is_error": result.is_error,
            })
        }
        ToolFormat::Generic => json!({
            "tool_call_id": result.call_id,
            "content": text,
            "is_error": result.is_error,
            "error": result.error.as_ref().map(|e| e.message.clone()),
        }),
    }
}
