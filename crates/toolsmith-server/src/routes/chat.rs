use crate::state::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{stream::StreamExt, Stream};
use serde::Deserialize;
use serde_json::Value;
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use toolsmith::{
    agent::Agent,
    augmenter::base_prompt,
    models::message::Message,
    models::tool::ToolCall,
    protocol::{FinishReason, StreamEvent, DATA_STREAM_VERSION},
    providers::factory,
    registry::ToolRegistry,
    systems::local_systems,
};

// Types matching the incoming useChat JSON structure
#[derive(Debug, Deserialize)]
struct ChatRequest {
    messages: Vec<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    #[serde(default)]
    id: Option<String>,
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    #[serde(rename = "toolInvocations")]
    tool_invocations: Vec<ToolInvocation>,
    /// Text and tool invocations in the order they were generated
    #[serde(default)]
    parts: Vec<IncomingPart>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum IncomingPart {
    Text {
        text: String,
    },
    ToolInvocation {
        #[serde(rename = "toolInvocation")]
        tool_invocation: ToolInvocation,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ToolInvocation {
    state: String,
    #[serde(rename = "toolCallId")]
    tool_call_id: String,
    #[serde(rename = "toolName")]
    tool_name: String,
    #[serde(default)]
    args: Value,
    #[serde(default)]
    result: Option<Value>,
}

// Chunked response body in the data stream protocol
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> axum::response::Response {
        let body = axum::body::Body::from_stream(self);

        (
            [
                ("content-type", "text/plain; charset=utf-8"),
                ("cache-control", "no-cache"),
                ("x-vercel-ai-data-stream", DATA_STREAM_VERSION),
            ],
            body,
        )
            .into_response()
    }
}

// Convert incoming messages to our internal Message type
fn convert_messages(incoming: Vec<IncomingMessage>) -> Vec<Message> {
    let mut messages = Vec::new();

    for msg in incoming {
        match msg.role.as_str() {
            "user" => {
                let mut message = Message::user().with_text(msg.content);
                if let Some(id) = msg.id {
                    message = message.with_id(id);
                }
                messages.push(message);
            }
            "assistant" => {
                let parts = if msg.parts.is_empty() {
                    // without parts the text was generated before the tool calls
                    std::iter::once(IncomingPart::Text { text: msg.content })
                        .chain(
                            msg.tool_invocations
                                .into_iter()
                                .map(|tool_invocation| IncomingPart::ToolInvocation { tool_invocation }),
                        )
                        .collect()
                } else {
                    msg.parts
                };
                convert_assistant_parts(parts, msg.id, &mut messages);
            }
            _ => {
                tracing::warn!("Unknown role: {}", msg.role);
            }
        }
    }

    messages
}

/// Split one assistant message into steps: the text and completed tool calls of a
/// step, then a user message with their results. Text after results opens the
/// next step. Partial invocations were cut off mid-turn and are dropped.
fn convert_assistant_parts(
    parts: Vec<IncomingPart>,
    mut id: Option<String>,
    messages: &mut Vec<Message>,
) {
    let mut step = Message::assistant();
    let mut results = Message::user();

    let mut flush = |step: Message, results: Message, messages: &mut Vec<Message>| {
        if step.is_empty() {
            return;
        }
        match id.take() {
            Some(id) => messages.push(step.with_id(id)),
            None => messages.push(step),
        }
        if !results.is_empty() {
            messages.push(results);
        }
    };

    for part in parts {
        match part {
            IncomingPart::Text { text } => {
                if !results.is_empty() {
                    flush(
                        std::mem::replace(&mut step, Message::assistant()),
                        std::mem::replace(&mut results, Message::user()),
                        messages,
                    );
                }
                if !text.is_empty() {
                    step = step.with_text(text);
                }
            }
            IncomingPart::ToolInvocation { tool_invocation: tool } => {
                if tool.state != "result" {
                    continue;
                }
                let Some(result) = tool.result else {
                    continue;
                };
                let args = if tool.args.is_null() {
                    Value::Object(Default::default())
                } else {
                    tool.args
                };
                step = step.with_tool_request(
                    tool.tool_call_id.clone(),
                    Ok(ToolCall::new(tool.tool_name, args)),
                );
                results = results.with_tool_response(tool.tool_call_id, Ok(result));
            }
            IncomingPart::Other => {}
        }
    }
    flush(step, results, messages);
}

async fn send_failure(tx: &mpsc::Sender<String>, error: &anyhow::Error) {
    let _ = tx.send(StreamEvent::Error(error.to_string()).encode()).await;
    let _ = tx
        .send(StreamEvent::finish(FinishReason::Error).encode())
        .await;
}

async fn stream_reply(agent: Agent, messages: Vec<Message>, tx: mpsc::Sender<String>) {
    let mut stream = match agent.reply(&messages).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!("Failed to start reply stream: {}", e);
            send_failure(&tx, &e).await;
            return;
        }
    };

    loop {
        match timeout(Duration::from_millis(500), stream.next()).await {
            Ok(Some(Ok(event))) => {
                if let Err(e) = tx.send(event.encode()).await {
                    tracing::error!("Error sending event through channel: {}", e);
                    break;
                }
            }
            Ok(Some(Err(e))) => {
                tracing::error!("Error processing reply: {}", e);
                send_failure(&tx, &e).await;
                break;
            }
            Ok(None) => {
                break;
            }
            Err(_) => {
                // Heartbeat, used to detect disconnected clients and then end running tools.
                if tx.is_closed() {
                    tracing::info!("client disconnected, dropping reply");
                    break;
                }
                continue;
            }
        }
    }
}

async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<SseResponse, StatusCode> {
    // Check protocol header (optional in our case)
    if let Some(protocol) = headers.get("x-protocol") {
        if protocol.to_str().map(|p| p != "data").unwrap_or(true) {
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    let provider = factory::get_provider(state.provider_config).map_err(|e| {
        tracing::error!("Failed to create provider: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let collaborator = state.augmenter.system().await.map_err(|e| {
        tracing::error!("Failed to fetch collaborator tools: {}", e);
        StatusCode::BAD_GATEWAY
    })?;
    let local = local_systems(&state.backend_url).map_err(|e| {
        tracing::error!("Failed to create local systems: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let agent = Agent::new(provider, ToolRegistry::compose(collaborator, local))
        .with_max_steps(state.max_steps);

    let base = base_prompt().map_err(|e| {
        tracing::error!("Failed to load base prompt: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let system_prompt = state
        .augmenter
        .system_prompt(&base, &agent.system_infos())
        .await
        .map_err(|e| {
            tracing::error!("Failed to generate system prompt: {}", e);
            StatusCode::BAD_GATEWAY
        })?;
    let agent = agent.with_system_prompt(system_prompt);

    // Convert incoming messages
    let messages = convert_messages(request.messages);
    tracing::info!(
        messages = messages.len(),
        tools = agent.registry().tools().len(),
        "starting chat reply"
    );

    // Create channel for streaming
    let (tx, rx) = mpsc::channel(100);
    tokio::spawn(stream_reply(agent, messages, tx));

    Ok(SseResponse::new(ReceiverStream::new(rx)))
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(handler))
        .with_state(state)
}
