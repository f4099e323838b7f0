//! The line-oriented data stream protocol spoken between the chat route and its client.
//!
//! Every event is one line, `<code>:<json>\n`. The codes follow the AI SDK data
//! stream protocol so that a `useChat` front end can consume the same endpoint.
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::AgentResult;
use crate::providers::base::Usage;
use crate::systems::error_payload;

/// Value of the `x-vercel-ai-data-stream` response header
pub const DATA_STREAM_VERSION: &str = "v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    /// The model produced a final answer
    Stop,
    /// The step budget ran out
    Length,
    /// Tool calls are waiting for the client
    ToolCalls,
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
}

impl From<&Usage> for TokenUsage {
    fn from(usage: &Usage) -> Self {
        Self {
            prompt_tokens: usage.input_tokens.unwrap_or(0),
            completion_tokens: usage.output_tokens.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    StartStep {
        message_id: String,
    },
    TextDelta(String),
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        args: Value,
    },
    ToolResult {
        tool_call_id: String,
        result: Value,
    },
    FinishStep {
        finish_reason: FinishReason,
        usage: TokenUsage,
        is_continued: bool,
    },
    Error(String),
    Finish {
        finish_reason: FinishReason,
        usage: TokenUsage,
    },
}

impl StreamEvent {
    /// A tool result event. Errors the tool could not even run with travel as an
    /// `{error}` payload, the same shape a failed execution reports.
    pub fn tool_result<S: Into<String>>(id: S, result: &AgentResult<Value>) -> Self {
        let result = match result {
            Ok(value) => value.clone(),
            Err(e) => error_payload(&e.to_string()),
        };
        StreamEvent::ToolResult {
            tool_call_id: id.into(),
            result,
        }
    }

    pub fn finish(finish_reason: FinishReason) -> Self {
        StreamEvent::Finish {
            finish_reason,
            usage: TokenUsage::default(),
        }
    }

    /// Encode as one protocol line, newline included
    pub fn encode(&self) -> String {
        let (code, payload) = match self {
            StreamEvent::StartStep { message_id } => ('f', json!({ "messageId": message_id })),
            StreamEvent::TextDelta(text) => ('0', json!(text)),
            StreamEvent::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => (
                '9',
                json!({
                    "toolCallId": tool_call_id,
                    "toolName": tool_name,
                    "args": args,
                }),
            ),
            StreamEvent::ToolResult {
                tool_call_id,
                result,
            } => (
                'a',
                json!({
                    "toolCallId": tool_call_id,
                    "result": result,
                }),
            ),
            StreamEvent::FinishStep {
                finish_reason,
                usage,
                is_continued,
            } => (
                'e',
                json!({
                    "finishReason": finish_reason,
                    "usage": usage,
                    "isContinued": is_continued,
                }),
            ),
            StreamEvent::Error(message) => ('3', json!(message)),
            StreamEvent::Finish {
                finish_reason,
                usage,
            } => (
                'd',
                json!({
                    "finishReason": finish_reason,
                    "usage": usage,
                }),
            ),
        };
        format!("{}:{}\n", code, payload)
    }

    /// Decode one protocol line. Blank lines and codes this client does not
    /// use decode to `None`.
    pub fn decode(line: &str) -> Result<Option<Self>> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Ok(None);
        }
        let (code, payload) = line
            .split_once(':')
            .ok_or_else(|| anyhow!("Malformed stream line: {}", line))?;
        let payload: Value = serde_json::from_str(payload)?;

        let event = match code {
            "f" => StreamEvent::StartStep {
                message_id: str_field(&payload, "messageId")?,
            },
            "0" => StreamEvent::TextDelta(
                payload
                    .as_str()
                    .ok_or_else(|| anyhow!("Text delta is not a string"))?
                    .to_string(),
            ),
            "9" => StreamEvent::ToolCall {
                tool_call_id: str_field(&payload, "toolCallId")?,
                tool_name: str_field(&payload, "toolName")?,
                args: payload.get("args").cloned().unwrap_or(Value::Null),
            },
            "a" => StreamEvent::ToolResult {
                tool_call_id: str_field(&payload, "toolCallId")?,
                result: payload.get("result").cloned().unwrap_or(Value::Null),
            },
            "e" => StreamEvent::FinishStep {
                finish_reason: finish_reason_field(&payload)?,
                usage: usage_field(&payload),
                is_continued: payload
                    .get("isContinued")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            },
            "3" => StreamEvent::Error(
                payload
                    .as_str()
                    .map(String::from)
                    .unwrap_or_else(|| payload.to_string()),
            ),
            "d" => StreamEvent::Finish {
                finish_reason: finish_reason_field(&payload)?,
                usage: usage_field(&payload),
            },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

fn str_field(payload: &Value, name: &str) -> Result<String> {
    payload
        .get(name)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| anyhow!("Missing field {} in stream event", name))
}

fn finish_reason_field(payload: &Value) -> Result<FinishReason> {
    Ok(serde_json::from_value(
        payload
            .get("finishReason")
            .cloned()
            .ok_or_else(|| anyhow!("Missing field finishReason in stream event"))?,
    )?)
}

fn usage_field(payload: &Value) -> TokenUsage {
    payload
        .get("usage")
        .cloned()
        .and_then(|u| serde_json::from_value(u).ok())
        .unwrap_or_default()
}
