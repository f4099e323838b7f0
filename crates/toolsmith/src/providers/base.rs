use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::models::message::{Message, MessageContent, ToolRequest};
use crate::models::tool::Tool;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// One increment of a streamed completion, in generation order
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    TextDelta(String),
    ToolRequest(ToolRequest),
    Finish(Usage),
}

pub type ProviderStream = BoxStream<'static, Result<ProviderEvent>>;

/// Base trait for AI providers (OpenAI, Anthropic, etc)
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate the next message using the configured model and other parameters
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)>;

    /// Stream the next message. Providers without native streaming deliver the
    /// whole completion as a single burst of events.
    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ProviderStream> {
        let (message, usage) = self.complete(system, messages, tools).await?;
        let mut events: Vec<Result<ProviderEvent>> = message
            .content
            .into_iter()
            .filter_map(|content| match content {
                MessageContent::Text(text) if !text.text.is_empty() => {
                    Some(Ok(ProviderEvent::TextDelta(text.text)))
                }
                MessageContent::ToolRequest(request) => {
                    Some(Ok(ProviderEvent::ToolRequest(request)))
                }
                _ => None,
            })
            .collect();
        events.push(Ok(ProviderEvent::Finish(usage)));
        Ok(Box::pin(futures::stream::iter(events)))
    }
}
