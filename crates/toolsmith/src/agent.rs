use anyhow::Result;
use futures::stream::{BoxStream, StreamExt};
use nanoid::nanoid;

use crate::augmenter::SystemInfo;
use crate::errors::AgentResult;
use crate::models::message::{Message, MessageContent, ToolRequest};
use crate::protocol::{FinishReason, StreamEvent, TokenUsage};
use crate::providers::base::{Provider, ProviderEvent};
use crate::registry::ToolRegistry;

pub const DEFAULT_MAX_STEPS: usize = 20;

/// Where a reply is in its step loop
#[derive(Debug)]
enum ReplyState {
    /// Asking the model for step `step` (1-based)
    Generating { step: usize },
    /// Running the tool calls the model made in `step`
    Dispatching {
        step: usize,
        requests: Vec<ToolRequest>,
    },
    Finished(FinishReason),
}

/// Agent integrates a foundational LLM with the tools of one chat request
pub struct Agent {
    provider: Box<dyn Provider>,
    registry: ToolRegistry,
    system_prompt: String,
    max_steps: usize,
}

impl Agent {
    pub fn new(provider: Box<dyn Provider>, registry: ToolRegistry) -> Self {
        Self {
            provider,
            registry,
            system_prompt: String::new(),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_system_prompt<S: Into<String>>(mut self, system_prompt: S) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// At least one step always runs
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Template input for every system the registry holds
    pub fn system_infos(&self) -> Vec<SystemInfo> {
        self.registry.systems().map(SystemInfo::of).collect()
    }

    /// Resolve every server-side call of one step concurrently.
    ///
    /// The output lines up with `requests`; `None` marks a call the client resolves.
    async fn dispatch_step(
        &self,
        requests: &[ToolRequest],
    ) -> Vec<Option<AgentResult<serde_json::Value>>> {
        let futures: Vec<_> = requests
            .iter()
            .map(|request| async move {
                match &request.tool_call {
                    Ok(call) if self.registry.is_client_tool(&call.name) => None,
                    Ok(call) => Some(self.registry.dispatch(call.clone()).await),
                    Err(e) => Some(Err(e.clone())),
                }
            })
            .collect();

        futures::future::join_all(futures).await
    }

    /// Create a stream of protocol events for one reply.
    ///
    /// The model is asked at most `max_steps` times. Each step is relayed as it
    /// is generated; tool calls are then executed and their results fed back
    /// for the next step. The last event is always `Finish`, unless the
    /// provider fails, in which case the stream ends with that error.
    pub async fn reply(&self, messages: &[Message]) -> Result<BoxStream<'_, Result<StreamEvent>>> {
        let mut messages = messages.to_vec();
        let tools = self.registry.tools();

        Ok(Box::pin(async_stream::try_stream! {
            let mut usage = TokenUsage::default();
            let mut state = ReplyState::Generating { step: 1 };

            loop {
                match state {
                    ReplyState::Generating { step } => {
                        tracing::debug!(step, "generating");
                        let message_id = format!("msg-{}", nanoid!());
                        yield StreamEvent::StartStep { message_id: message_id.clone() };

                        let mut response = Message::assistant().with_id(message_id);
                        let mut step_usage = TokenUsage::default();
                        let mut events = self
                            .provider
                            .stream(&self.system_prompt, &messages, &tools)
                            .await?;

                        while let Some(event) = events.next().await {
                            match event? {
                                ProviderEvent::TextDelta(text) => {
                                    response.push_text_delta(&text);
                                    yield StreamEvent::TextDelta(text);
                                }
                                ProviderEvent::ToolRequest(request) => {
                                    // announced even when malformed, so its result has a call to attach to
                                    yield StreamEvent::ToolCall {
                                        tool_call_id: request.id.clone(),
                                        tool_name: request.name().to_string(),
                                        args: request.arguments(),
                                    };
                                    response = response.with_content(MessageContent::ToolRequest(request));
                                }
                                ProviderEvent::Finish(provider_usage) => {
                                    step_usage = TokenUsage::from(&provider_usage);
                                }
                            }
                        }

                        usage.prompt_tokens += step_usage.prompt_tokens;
                        usage.completion_tokens += step_usage.completion_tokens;

                        let requests: Vec<ToolRequest> = response.tool_requests().cloned().collect();
                        let finish_reason = if requests.is_empty() {
                            FinishReason::Stop
                        } else {
                            FinishReason::ToolCalls
                        };
                        yield StreamEvent::FinishStep {
                            finish_reason,
                            usage: step_usage,
                            is_continued: false,
                        };

                        messages.push(response);
                        state = if requests.is_empty() {
                            ReplyState::Finished(FinishReason::Stop)
                        } else {
                            ReplyState::Dispatching { step, requests }
                        };
                    }
                    ReplyState::Dispatching { step, requests } => {
                        let outputs = self.dispatch_step(&requests).await;

                        let mut awaiting_client = false;
                        let mut message_tool_response = Message::user();
                        for (request, output) in requests.iter().zip(outputs.into_iter()) {
                            let result = match output {
                                Some(result) => result,
                                None => {
                                    awaiting_client = true;
                                    continue;
                                }
                            };
                            if let Err(e) = &result {
                                tracing::warn!(id = %request.id, error = %e, "tool call failed");
                            }
                            yield StreamEvent::tool_result(request.id.clone(), &result);
                            message_tool_response =
                                message_tool_response.with_tool_response(request.id.clone(), result);
                        }
                        if !message_tool_response.is_empty() {
                            messages.push(message_tool_response);
                        }

                        state = if awaiting_client {
                            ReplyState::Finished(FinishReason::ToolCalls)
                        } else if step >= self.max_steps {
                            tracing::warn!(max_steps = self.max_steps, "step budget exhausted");
                            ReplyState::Finished(FinishReason::Length)
                        } else {
                            ReplyState::Generating { step: step + 1 }
                        };
                    }
                    ReplyState::Finished(finish_reason) => {
                        yield StreamEvent::Finish { finish_reason, usage };
                        break;
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AgentError;
    use crate::models::tool::{Tool, ToolCall};
    use crate::providers::base::Usage;
    use crate::providers::mock::MockProvider;
    use crate::providers::utils::{messages_to_openai_spec, tool_request_from_parts};
    use crate::systems::{InterfaceSystem, System};
    use async_trait::async_trait;
    use futures::TryStreamExt;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    // Mock system for testing
    struct MockSystem {
        tools: Vec<Tool>,
        calls: Arc<AtomicUsize>,
        // echo messages in the order their calls completed
        completed: Arc<Mutex<Vec<String>>>,
    }

    impl MockSystem {
        fn new() -> Self {
            Self {
                tools: vec![
                    Tool::new(
                        "echo",
                        "Echoes back the input",
                        json!({
                            "type": "object",
                            "properties": {
                                "message": {"type": "string"},
                                "delay_ms": {"type": "integer"}
                            },
                            "required": ["message"]
                        }),
                    ),
                    Tool::new(
                        "backend",
                        "Reports a failed backend call",
                        json!({"type": "object", "properties": {}}),
                    ),
                ],
                calls: Arc::new(AtomicUsize::new(0)),
                completed: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl System for MockSystem {
        fn name(&self) -> &str {
            "MockSystem"
        }

        fn description(&self) -> &str {
            "A mock system for testing"
        }

        fn instructions(&self) -> &str {
            "Mock system instructions"
        }

        fn tools(&self) -> &[Tool] {
            &self.tools
        }

        async fn call(&self, tool_call: ToolCall) -> AgentResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match tool_call.name.as_str() {
                "echo" => {
                    if let Some(delay) = tool_call.arguments["delay_ms"].as_u64() {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                    let message = tool_call.arguments["message"].clone();
                    self.completed
                        .lock()
                        .unwrap()
                        .push(message.as_str().unwrap_or_default().to_string());
                    Ok(json!({"echo": message}))
                }
                "backend" => Ok(json!({"error": "Could not fetch sushi recommendations"})),
                _ => Err(AgentError::ToolNotFound(tool_call.name)),
            }
        }
    }

    fn registry_with(system: MockSystem) -> ToolRegistry {
        let local: Vec<Box<dyn System>> = vec![Box::new(system), Box::new(InterfaceSystem::new())];
        ToolRegistry::compose(None, local)
    }

    async fn collect(agent: &Agent, text: &str) -> Result<Vec<StreamEvent>> {
        let messages = vec![Message::user().with_text(text)];
        agent.reply(&messages).await?.try_collect().await
    }

    fn finish_reason(events: &[StreamEvent]) -> Option<FinishReason> {
        match events.last() {
            Some(StreamEvent::Finish { finish_reason, .. }) => Some(*finish_reason),
            _ => None,
        }
    }

    fn tool_results(events: &[StreamEvent]) -> Vec<(String, Value)> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolResult {
                    tool_call_id,
                    result,
                } => Some((tool_call_id.clone(), result.clone())),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_simple_response() -> Result<()> {
        let provider = MockProvider::new(vec![Message::assistant().with_text("Hello!")]);
        let agent = Agent::new(Box::new(provider), ToolRegistry::new());

        let events = collect(&agent, "Hi").await?;

        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], StreamEvent::StartStep { message_id } if message_id.starts_with("msg-")));
        assert_eq!(events[1], StreamEvent::TextDelta("Hello!".to_string()));
        assert!(matches!(
            events[2],
            StreamEvent::FinishStep {
                finish_reason: FinishReason::Stop,
                ..
            }
        ));
        assert_eq!(finish_reason(&events), Some(FinishReason::Stop));
        Ok(())
    }

    #[tokio::test]
    async fn test_tool_call() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant().with_tool_request(
                "1",
                Ok(ToolCall::new("echo", json!({"message": "test"}))),
            ),
            Message::assistant().with_text("Done!"),
        ]);
        let requests = provider.requests();
        let agent = Agent::new(Box::new(provider), registry_with(MockSystem::new()));

        let events = collect(&agent, "Echo test").await?;

        assert!(events.contains(&StreamEvent::ToolCall {
            tool_call_id: "1".to_string(),
            tool_name: "echo".to_string(),
            args: json!({"message": "test"}),
        }));
        assert_eq!(
            tool_results(&events),
            vec![("1".to_string(), json!({"echo": "test"}))]
        );
        assert!(events.contains(&StreamEvent::TextDelta("Done!".to_string())));
        assert_eq!(finish_reason(&events), Some(FinishReason::Stop));

        // second step sees the request and its result
        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let history = &requests[1];
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].tool_requests().count(), 1);
        assert_eq!(
            history[2].tool_responses().next().map(|r| r.id.as_str()),
            Some("1")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_tool() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant().with_tool_request("1", Ok(ToolCall::new("invalid_tool", json!({})))),
            Message::assistant().with_text("Error occurred"),
        ]);
        let agent = Agent::new(Box::new(provider), registry_with(MockSystem::new()));

        let events = collect(&agent, "Invalid tool").await?;

        let results = tool_results(&events);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, json!({"error": "Tool not found: invalid_tool"}));
        assert!(events.contains(&StreamEvent::TextDelta("Error occurred".to_string())));
        assert_eq!(finish_reason(&events), Some(FinishReason::Stop));
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_arguments_reach_model_not_system() -> Result<()> {
        let system = MockSystem::new();
        let calls = Arc::clone(&system.calls);
        let provider = MockProvider::new(vec![
            Message::assistant().with_tool_request("1", Ok(ToolCall::new("echo", json!({"message": 7})))),
            Message::assistant().with_text("Let me retry"),
        ]);
        let requests = provider.requests();
        let agent = Agent::new(Box::new(provider), registry_with(system));

        collect(&agent, "Echo").await?;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let requests = requests.lock().unwrap();
        let response = requests[1][2].tool_responses().next().cloned();
        assert!(matches!(
            response.map(|r| r.tool_result),
            Some(Err(AgentError::InvalidParameters(_)))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_unparseable_call_is_announced_and_answered_once() -> Result<()> {
        let system = MockSystem::new();
        let calls = Arc::clone(&system.calls);
        let malformed = tool_request_from_parts("call_bad".into(), "echo", "{\"message\": ");
        let provider = MockProvider::new(vec![
            Message::assistant().with_content(malformed),
            Message::assistant().with_text("Let me try that again"),
        ]);
        let requests = provider.requests();
        let agent = Agent::new(Box::new(provider), registry_with(system));

        let events = collect(&agent, "Echo something").await?;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::ToolCall { tool_call_id, tool_name, .. }
                if tool_call_id == "call_bad" && tool_name == "echo"
        )));
        let results = tool_results(&events);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "call_bad");
        assert!(results[0].1["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid parameters"));

        // the retry step sees the call once in the assistant message and one answer to it
        let requests = requests.lock().unwrap();
        let wire = messages_to_openai_spec(&requests[1]);
        assert_eq!(wire[1]["role"], "assistant");
        assert_eq!(wire[1]["tool_calls"][0]["id"], "call_bad");
        assert_eq!(wire[1]["tool_calls"][0]["function"]["arguments"], "{\"message\": ");
        let answers: Vec<_> = wire
            .iter()
            .filter(|m| m["role"] == "tool" && m["tool_call_id"] == "call_bad")
            .collect();
        assert_eq!(answers.len(), 1);
        assert!(answers[0]["content"]
            .as_str()
            .unwrap()
            .starts_with("The tool call was malformed"));
        assert_eq!(finish_reason(&events), Some(FinishReason::Stop));
        Ok(())
    }

    #[tokio::test]
    async fn test_multiple_tool_calls_keep_their_ids() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant()
                .with_tool_request(
                    "1",
                    Ok(ToolCall::new("echo", json!({"message": "first", "delay_ms": 100}))),
                )
                .with_tool_request("2", Ok(ToolCall::new("echo", json!({"message": "second"})))),
            Message::assistant().with_text("All done!"),
        ]);
        let system = MockSystem::new();
        let completed = Arc::clone(&system.completed);
        let agent = Agent::new(Box::new(provider), registry_with(system));

        let events = collect(&agent, "Multiple calls").await?;

        // the slow first call finished last, yet each result keeps its own id
        assert_eq!(*completed.lock().unwrap(), vec!["second", "first"]);

        assert_eq!(
            tool_results(&events),
            vec![
                ("1".to_string(), json!({"echo": "first"})),
                ("2".to_string(), json!({"echo": "second"})),
            ]
        );
        assert_eq!(finish_reason(&events), Some(FinishReason::Stop));
        Ok(())
    }

    #[tokio::test]
    async fn test_step_budget_truncates_with_length() -> Result<()> {
        let system = MockSystem::new();
        let calls = Arc::clone(&system.calls);
        let responses = (0..10)
            .map(|i| {
                Message::assistant().with_tool_request(
                    format!("call_{}", i),
                    Ok(ToolCall::new("echo", json!({"message": "again"}))),
                )
            })
            .collect();
        let provider = MockProvider::new(responses);
        let requests = provider.requests();
        let agent = Agent::new(Box::new(provider), registry_with(system)).with_max_steps(3);

        let events = collect(&agent, "Loop forever").await?;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(requests.lock().unwrap().len(), 3);
        let starts = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::StartStep { .. }))
            .count();
        assert_eq!(starts, 3);
        assert_eq!(finish_reason(&events), Some(FinishReason::Length));
        Ok(())
    }

    #[tokio::test]
    async fn test_client_tool_ends_turn_after_server_tools() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant()
                .with_text("Showing it")
                .with_tool_request("1", Ok(ToolCall::new("showButton", json!({}))))
                .with_tool_request("2", Ok(ToolCall::new("echo", json!({"message": "side"})))),
            Message::assistant().with_text("never asked"),
        ]);
        let requests = provider.requests();
        let agent = Agent::new(Box::new(provider), registry_with(MockSystem::new()));

        let events = collect(&agent, "Show me the button").await?;

        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::ToolCall { tool_name, .. } if tool_name == "showButton"
        )));
        assert_eq!(
            tool_results(&events),
            vec![("2".to_string(), json!({"echo": "side"}))]
        );
        assert_eq!(finish_reason(&events), Some(FinishReason::ToolCalls));
        assert_eq!(requests.lock().unwrap().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_backend_payload_continues() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant().with_tool_request("1", Ok(ToolCall::new("backend", json!({})))),
            Message::assistant().with_text("The backend is down."),
        ]);
        let agent = Agent::new(Box::new(provider), registry_with(MockSystem::new()));

        let events = collect(&agent, "Sushi please").await?;

        assert_eq!(
            tool_results(&events)[0].1,
            json!({"error": "Could not fetch sushi recommendations"})
        );
        assert!(events.contains(&StreamEvent::TextDelta("The backend is down.".to_string())));
        assert_eq!(finish_reason(&events), Some(FinishReason::Stop));
        Ok(())
    }

    #[tokio::test]
    async fn test_usage_is_summed_across_steps() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant().with_tool_request("1", Ok(ToolCall::new("echo", json!({"message": "hi"})))),
            Message::assistant().with_text("Done"),
        ])
        .with_usage(Usage::new(Some(10), Some(4), Some(14)));
        let agent = Agent::new(Box::new(provider), registry_with(MockSystem::new()));

        let events = collect(&agent, "Echo hi").await?;

        match events.last() {
            Some(StreamEvent::Finish { usage, .. }) => {
                assert_eq!(usage.prompt_tokens, 20);
                assert_eq!(usage.completion_tokens, 8);
            }
            other => panic!("Expected a finish event, got {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_provider_failure_ends_the_stream_with_an_error() -> Result<()> {
        let provider = MockProvider::new(vec![Message::assistant()
            .with_tool_request("1", Ok(ToolCall::new("echo", json!({"message": "hi"}))))])
        .then_fail("model unavailable");
        let agent = Agent::new(Box::new(provider), registry_with(MockSystem::new()));

        let messages = vec![Message::user().with_text("Echo hi")];
        let results: Vec<Result<StreamEvent>> = agent.reply(&messages).await?.collect().await;

        // the first step and its tool result still arrive before the failure
        assert!(results.iter().any(|r| matches!(
            r,
            Ok(StreamEvent::ToolResult { tool_call_id, .. }) if tool_call_id == "1"
        )));
        match results.last() {
            Some(Err(e)) => assert!(e.to_string().contains("model unavailable")),
            other => panic!("Expected the stream to end with an error, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_system_infos_follow_registry() {
        let agent = Agent::new(
            Box::new(MockProvider::new(vec![])),
            registry_with(MockSystem::new()),
        );
        let names: Vec<String> = agent.system_infos().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["MockSystem", "InterfaceSystem"]);
    }
}
