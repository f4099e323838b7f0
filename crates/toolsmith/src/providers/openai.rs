use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};

use super::base::{Provider, ProviderEvent, ProviderStream, Usage};
use super::configs::OpenAiProviderConfig;
use super::utils::{
    check_openai_context_length_error, messages_to_openai_spec, openai_response_to_message,
    tool_request_from_parts, tools_to_openai_spec,
};
use crate::models::message::{Message, MessageContent};
use crate::models::tool::Tool;

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self { client, config })
    }

    fn get_usage(data: &Value) -> Result<Usage> {
        let usage = data
            .get("usage")
            .filter(|u| !u.is_null())
            .ok_or_else(|| anyhow!("No usage data in response"))?;

        let input_tokens = usage
            .get("prompt_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);

        let output_tokens = usage
            .get("completion_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);

        let total_tokens = usage
            .get("total_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
            .or_else(|| match (input_tokens, output_tokens) {
                (Some(input), Some(output)) => Some(input + output),
                _ => None,
            });

        Ok(Usage::new(input_tokens, output_tokens, total_tokens))
    }

    fn build_payload(&self, system: &str, messages: &[Message], tools: &[Tool]) -> Result<Value> {
        let system_message = json!({
            "role": "system",
            "content": system
        });

        let mut messages_array = vec![system_message];
        messages_array.extend(messages_to_openai_spec(messages));

        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(self.config.model));
        payload.insert("messages".to_string(), json!(messages_array));

        if !tools.is_empty() {
            payload.insert("tools".to_string(), json!(tools_to_openai_spec(tools)?));
        }
        if let Some(temp) = self.config.temperature {
            payload.insert("temperature".to_string(), json!(temp));
        }
        if let Some(tokens) = self.config.max_tokens {
            payload.insert("max_tokens".to_string(), json!(tokens));
        }
        Ok(Value::Object(payload))
    }

    async fn post(&self, payload: &Value) -> Result<reqwest::Response> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                Err(anyhow!("Server error: {}", status))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(anyhow!("Request failed: {}\nResponse: {}", status, body))
            }
        }
    }
}

fn check_error(response: &Value) -> Result<()> {
    if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
        if let Some(err) = check_openai_context_length_error(error) {
            return Err(err.into());
        }
        return Err(anyhow!("OpenAI API error: {}", error));
    }
    Ok(())
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Collects streamed tool call fragments, keyed by their index in the choice
#[derive(Default)]
struct ToolCallAccumulator {
    calls: BTreeMap<u64, PartialToolCall>,
}

impl ToolCallAccumulator {
    fn push(&mut self, fragment: &Value) {
        let index = fragment.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
        let call = self.calls.entry(index).or_default();
        if let Some(id) = fragment.get("id").and_then(|v| v.as_str()) {
            call.id = id.to_string();
        }
        if let Some(function) = fragment.get("function") {
            if let Some(name) = function.get("name").and_then(|v| v.as_str()) {
                call.name.push_str(name);
            }
            if let Some(arguments) = function.get("arguments").and_then(|v| v.as_str()) {
                call.arguments.push_str(arguments);
            }
        }
    }

    fn finish(self) -> Vec<MessageContent> {
        self.calls
            .into_values()
            .map(|call| tool_request_from_parts(call.id, &call.name, &call.arguments))
            .collect()
    }
}

/// Splits a byte stream into complete lines, keeping partial lines (and partial
/// UTF-8 sequences) buffered until the rest arrives
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn extend(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim().to_string());
        }
        lines
    }

    fn remainder(self) -> Option<String> {
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        (!line.is_empty()).then_some(line)
    }
}

/// Outcome of a single server-sent event line
enum SseLine {
    Skip,
    Done,
    Chunk(Value),
}

fn parse_sse_line(line: &str) -> Result<SseLine> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    let chunk: Value = serde_json::from_str(data)?;
    check_error(&chunk)?;
    Ok(SseLine::Chunk(chunk))
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        let payload = self.build_payload(system, messages, tools)?;
        let response: Value = self.post(&payload).await?.json().await?;

        check_error(&response)?;

        let message = openai_response_to_message(response.clone())?;
        let usage = Self::get_usage(&response)?;

        Ok((message, usage))
    }

    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ProviderStream> {
        let mut payload = self.build_payload(system, messages, tools)?;
        payload["stream"] = json!(true);
        payload["stream_options"] = json!({"include_usage": true});

        let response = self.post(&payload).await?;
        let mut bytes = response.bytes_stream();

        Ok(Box::pin(async_stream::try_stream! {
            let mut lines = LineBuffer::default();
            let mut tool_calls = ToolCallAccumulator::default();
            let mut usage = Usage::default();

            'read: while let Some(chunk) = bytes.next().await {
                for line in lines.extend(&chunk?) {
                    let chunk = match parse_sse_line(&line)? {
                        SseLine::Skip => continue,
                        SseLine::Done => break 'read,
                        SseLine::Chunk(chunk) => chunk,
                    };

                    if let Ok(reported) = Self::get_usage(&chunk) {
                        usage = reported;
                    }

                    let Some(delta) = chunk["choices"].get(0).and_then(|c| c.get("delta")) else {
                        continue;
                    };
                    if let Some(text) = delta.get("content").and_then(|t| t.as_str()) {
                        if !text.is_empty() {
                            yield ProviderEvent::TextDelta(text.to_string());
                        }
                    }
                    if let Some(fragments) = delta.get("tool_calls").and_then(|t| t.as_array()) {
                        for fragment in fragments {
                            tool_calls.push(fragment);
                        }
                    }
                }
            }

            if let Some(line) = lines.remainder() {
                if let SseLine::Chunk(chunk) = parse_sse_line(&line)? {
                    if let Some(text) = chunk["choices"][0]["delta"]["content"].as_str() {
                        yield ProviderEvent::TextDelta(text.to_string());
                    }
                }
            }

            for content in tool_calls.finish() {
                if let MessageContent::ToolRequest(request) = content {
                    yield ProviderEvent::ToolRequest(request);
                }
            }
            yield ProviderEvent::Finish(usage);
        }))
    }
}
