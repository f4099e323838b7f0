use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::{Provider, Usage};

/// Replays scripted completions in order and records every history it was sent.
/// Once the script runs out it answers with an empty assistant message.
pub struct MockProvider {
    script: Mutex<VecDeque<Result<Message, String>>>,
    usage: Usage,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockProvider {
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().map(Ok).collect()),
            usage: Usage::default(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail the completion after the scripted ones with this message
    pub fn then_fail(self, message: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    /// Report this usage for every completion
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Histories the provider was asked to complete, in call order
    pub fn requests(&self) -> Arc<Mutex<Vec<Vec<Message>>>> {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(
        &self,
        _system_prompt: &str,
        messages: &[Message],
        _tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        self.requests.lock().unwrap().push(messages.to_vec());
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(message)) => Ok((message, self.usage.clone())),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok((Message::assistant().with_text(""), self.usage.clone())),
        }
    }
}
