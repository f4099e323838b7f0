use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde_json::json;
use toolsmith::protocol::StreamEvent;

use crate::messages::UiMessage;

pub type EventStream = BoxStream<'static, Result<StreamEvent>>;

/// Sends the whole conversation and hands back the decoded response stream
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, messages: &[UiMessage]) -> Result<EventStream>;
}

/// Posts to the chat endpoint of a running server
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(server: &str) -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            endpoint: format!("{}/api/chat", server.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, messages: &[UiMessage]) -> Result<EventStream> {
        let wire: Vec<_> = messages.iter().map(UiMessage::to_wire).collect();
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-protocol", "data")
            .json(&json!({ "messages": wire }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Chat request failed: {} {}", status, body));
        }

        let mut bytes = response.bytes_stream();
        Ok(Box::pin(async_stream::try_stream! {
            // bytes of the line still being received
            let mut pending: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                pending.extend_from_slice(&chunk?);
                while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=newline).collect();
                    if let Some(event) = StreamEvent::decode(&String::from_utf8_lossy(&line))? {
                        yield event;
                    }
                }
            }
            if let Some(event) = StreamEvent::decode(&String::from_utf8_lossy(&pending))? {
                yield event;
            }
        }))
    }
}
