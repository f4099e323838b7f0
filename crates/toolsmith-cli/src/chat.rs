//! The client side of a conversation: submit, stream, resolve client tools.
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::StreamExt;
use serde_json::json;
use tokio::sync::Notify;
use toolsmith::models::role::Role;
use toolsmith::protocol::{FinishReason, StreamEvent};
use toolsmith::systems::interface::SHOW_BUTTON_TOOL;

use crate::messages::{ToolInvocation, UiMessage, UiPart};
use crate::prompt::prompt::Prompt;
use crate::transport::Transport;

pub const DEFAULT_MAX_STEPS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatStatus {
    Idle,
    /// Request sent, nothing received yet
    Submitting,
    Streaming,
}

/// Stops the response currently streaming. Stopping while idle does nothing.
#[derive(Clone, Default)]
pub struct StopHandle {
    notify: Arc<Notify>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.notify.notify_waiters();
    }
}

/// How one request ended
enum Outcome {
    Finished(Option<FinishReason>),
    Stopped,
}

pub struct ChatSession {
    transport: Box<dyn Transport>,
    messages: Vec<UiMessage>,
    status: ChatStatus,
    show_button: bool,
    error: Option<String>,
    max_steps: usize,
    stop: StopHandle,
}

impl ChatSession {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            messages: Vec::new(),
            status: ChatStatus::Idle,
            show_button: false,
            error: None,
            max_steps: DEFAULT_MAX_STEPS,
            stop: StopHandle::default(),
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn messages(&self) -> &[UiMessage] {
        &self.messages
    }

    #[cfg(test)]
    pub fn status(&self) -> ChatStatus {
        self.status
    }

    pub fn is_button_visible(&self) -> bool {
        self.show_button
    }

    pub fn dismiss_button(&mut self) {
        self.show_button = false;
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Send a user message and stream the reply, resubmitting on its own while
    /// the server is waiting on tools this client has already resolved.
    ///
    /// Ignored unless idle and the text is not blank.
    pub async fn submit(&mut self, text: &str, prompt: &mut dyn Prompt) -> Result<()> {
        if self.status != ChatStatus::Idle || text.trim().is_empty() {
            return Ok(());
        }
        self.error = None;
        self.messages.push(UiMessage::user(text.trim()));

        let mut round_trips = 0;
        loop {
            self.status = ChatStatus::Submitting;
            prompt.show_busy();

            match self.request(prompt).await {
                Ok(Outcome::Finished(Some(FinishReason::ToolCalls)))
                    if round_trips < self.max_steps && self.client_tools_resolved() =>
                {
                    round_trips += 1;
                    continue;
                }
                Ok(_) => {}
                Err(e) => self.fail(e, prompt),
            }
            break;
        }

        self.status = ChatStatus::Idle;
        prompt.focus_input();
        Ok(())
    }

    /// Marks the reply failed, or the user's message when no reply arrived
    fn fail(&mut self, error: anyhow::Error, prompt: &mut dyn Prompt) {
        if let Some(message) = self.messages.last_mut() {
            message.failed = true;
        }
        let error = error.to_string();
        prompt.render_error(&error);
        self.error = Some(error);
    }

    /// True when the last assistant message has tool calls and all of them have results
    fn client_tools_resolved(&self) -> bool {
        match self.messages.last() {
            Some(message) if message.role == Role::Assistant => {
                let mut invocations = message.invocations().peekable();
                invocations.peek().is_some() && invocations.all(ToolInvocation::is_resolved)
            }
            _ => false,
        }
    }

    /// The assistant message this response streams into
    fn current_reply(&mut self, prompt: &mut dyn Prompt) -> Result<&mut UiMessage> {
        if self.status == ChatStatus::Submitting {
            self.status = ChatStatus::Streaming;
            prompt.hide_busy();
            self.messages.push(UiMessage::assistant());
        }
        self.messages
            .last_mut()
            .ok_or_else(|| anyhow!("No message to stream into"))
    }

    async fn request(&mut self, prompt: &mut dyn Prompt) -> Result<Outcome> {
        let notify = Arc::clone(&self.stop.notify);
        let stopped = notify.notified();
        tokio::pin!(stopped);

        let mut events = tokio::select! {
            events = self.transport.send(&self.messages) => events?,
            _ = &mut stopped => return Ok(Outcome::Stopped),
        };

        let mut finish_reason = None;
        loop {
            let event = tokio::select! {
                event = events.next() => event,
                _ = &mut stopped => {
                    // dropping the stream aborts the request; what arrived so far stays
                    return Ok(Outcome::Stopped);
                }
            };
            let event = match event {
                Some(event) => event?,
                None => break,
            };

            match event {
                StreamEvent::StartStep { .. } | StreamEvent::FinishStep { .. } => {
                    self.current_reply(prompt)?;
                }
                StreamEvent::TextDelta(text) => {
                    self.current_reply(prompt)?.push_text(&text);
                    prompt.render_text(&text);
                }
                StreamEvent::ToolCall {
                    tool_call_id,
                    tool_name,
                    args,
                } => {
                    let mut invocation = ToolInvocation::call(tool_call_id, tool_name, args);
                    prompt.render_tool_call(&invocation);
                    if invocation.tool_name == SHOW_BUTTON_TOOL {
                        self.show_button = true;
                        prompt.show_button();
                        invocation.resolve(json!({ "message": "Button shown" }));
                    }
                    self.current_reply(prompt)?
                        .parts
                        .push(UiPart::ToolInvocation(invocation));
                }
                StreamEvent::ToolResult {
                    tool_call_id,
                    result,
                } => {
                    let reply = self.current_reply(prompt)?;
                    if let Some(invocation) = reply.invocation_mut(&tool_call_id) {
                        invocation.resolve(result);
                        prompt.render_tool_result(invocation);
                    }
                }
                StreamEvent::Error(message) => {
                    self.current_reply(prompt)?;
                    return Err(anyhow!(message));
                }
                StreamEvent::Finish {
                    finish_reason: reason,
                    ..
                } => {
                    finish_reason = Some(reason);
                }
            }
        }

        Ok(Outcome::Finished(finish_reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::InvocationState;
    use crate::prompt::prompt::Input;
    use crate::transport::EventStream;
    use async_trait::async_trait;
    use futures::stream;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use toolsmith::protocol::TokenUsage;

    /// Replays one scripted response per request and records what was sent
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Vec<Result<StreamEvent>>>>,
        sent: Arc<Mutex<Vec<Vec<Value>>>>,
        hang_after: bool,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Vec<StreamEvent>>) -> Self {
            Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|events| events.into_iter().map(Ok).collect())
                        .collect(),
                ),
                sent: Arc::new(Mutex::new(Vec::new())),
                hang_after: false,
            }
        }

        fn with_results(responses: Vec<Vec<Result<StreamEvent>>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
                sent: Arc::new(Mutex::new(Vec::new())),
                hang_after: false,
            }
        }

        /// Keep every response open after its scripted events
        fn hanging(mut self) -> Self {
            self.hang_after = true;
            self
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, messages: &[UiMessage]) -> Result<EventStream> {
            let wire = messages
                .iter()
                .map(|m| serde_json::to_value(m.to_wire()))
                .collect::<Result<Vec<_>, _>>()?;
            self.sent.lock().unwrap().push(wire);

            let events = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow!("no scripted response left"))?;
            let scripted = stream::iter(events);
            if self.hang_after {
                Ok(Box::pin(scripted.chain(stream::pending())))
            } else {
                Ok(Box::pin(scripted))
            }
        }
    }

    #[derive(Default)]
    struct RecordingPrompt {
        calls: Vec<String>,
    }

    impl RecordingPrompt {
        fn count(&self, call: &str) -> usize {
            self.calls.iter().filter(|c| c.as_str() == call).count()
        }
    }

    impl Prompt for RecordingPrompt {
        fn render_text(&mut self, text: &str) {
            self.calls.push(format!("text:{}", text));
        }
        fn render_tool_call(&mut self, invocation: &ToolInvocation) {
            self.calls.push(format!("call:{}", invocation.tool_name));
        }
        fn render_tool_result(&mut self, invocation: &ToolInvocation) {
            self.calls.push(format!("result:{}", invocation.tool_name));
        }
        fn render_error(&mut self, error: &str) {
            self.calls.push(format!("error:{}", error));
        }
        fn show_button(&mut self) {
            self.calls.push("button".to_string());
        }
        fn get_input(&mut self) -> Result<Input> {
            Err(anyhow!("no input in tests"))
        }
        fn show_busy(&mut self) {
            self.calls.push("busy".to_string());
        }
        fn hide_busy(&mut self) {
            self.calls.push("idle".to_string());
        }
        fn focus_input(&mut self) {
            self.calls.push("focus".to_string());
        }
        fn close(&self) {}
    }

    fn start() -> StreamEvent {
        StreamEvent::StartStep {
            message_id: "msg-1".to_string(),
        }
    }

    fn text(t: &str) -> StreamEvent {
        StreamEvent::TextDelta(t.to_string())
    }

    fn tool_call(id: &str, name: &str) -> StreamEvent {
        StreamEvent::ToolCall {
            tool_call_id: id.to_string(),
            tool_name: name.to_string(),
            args: json!({}),
        }
    }

    fn finish(reason: FinishReason) -> StreamEvent {
        StreamEvent::Finish {
            finish_reason: reason,
            usage: TokenUsage::default(),
        }
    }

    #[tokio::test]
    async fn test_streams_text_into_one_assistant_message() -> Result<()> {
        let transport = ScriptedTransport::new(vec![vec![
            start(),
            text("Hello"),
            text(", world"),
            finish(FinishReason::Stop),
        ]]);
        let mut session = ChatSession::new(Box::new(transport));
        let mut prompt = RecordingPrompt::default();

        session.submit("Hi", &mut prompt).await?;

        assert_eq!(session.status(), ChatStatus::Idle);
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[0].text(), "Hi");
        assert_eq!(session.messages()[1].role, Role::Assistant);
        assert_eq!(session.messages()[1].text(), "Hello, world");
        assert_eq!(prompt.count("focus"), 1);
        assert!(session.error().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_blank_input_is_ignored() -> Result<()> {
        let transport = ScriptedTransport::new(vec![]);
        let sent = Arc::clone(&transport.sent);
        let mut session = ChatSession::new(Box::new(transport));
        let mut prompt = RecordingPrompt::default();

        session.submit("   ", &mut prompt).await?;

        assert!(session.messages().is_empty());
        assert!(sent.lock().unwrap().is_empty());
        assert!(prompt.calls.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_show_button_is_intercepted_and_resubmitted() -> Result<()> {
        let transport = ScriptedTransport::new(vec![
            vec![
                start(),
                text("Here is your button."),
                tool_call("call_1", "showButton"),
                finish(FinishReason::ToolCalls),
            ],
            vec![start(), text("Let me know if you need more."), finish(FinishReason::Stop)],
        ]);
        let sent = Arc::clone(&transport.sent);
        let mut session = ChatSession::new(Box::new(transport));
        let mut prompt = RecordingPrompt::default();

        session.submit("Show me a button", &mut prompt).await?;

        assert!(session.is_button_visible());
        assert_eq!(prompt.count("button"), 1);

        let reply = &session.messages()[1];
        let invocation = reply.invocations().next().unwrap();
        assert_eq!(invocation.state, InvocationState::Result);
        assert_eq!(invocation.result, Some(json!({"message": "Button shown"})));

        // the resolved call went back to the server in the second request
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1][1]["toolInvocations"][0]["result"],
            json!({"message": "Button shown"})
        );
        assert_eq!(session.messages().len(), 3);
        assert_eq!(prompt.count("focus"), 1);

        session.dismiss_button();
        assert!(!session.is_button_visible());
        Ok(())
    }

    #[tokio::test]
    async fn test_unresolved_tool_calls_are_not_resubmitted() -> Result<()> {
        let transport = ScriptedTransport::new(vec![vec![
            start(),
            tool_call("call_1", "showButton"),
            tool_call("call_2", "somethingElse"),
            finish(FinishReason::ToolCalls),
        ]]);
        let sent = Arc::clone(&transport.sent);
        let mut session = ChatSession::new(Box::new(transport));
        let mut prompt = RecordingPrompt::default();

        session.submit("Do two things", &mut prompt).await?;

        assert_eq!(sent.lock().unwrap().len(), 1);
        assert_eq!(session.status(), ChatStatus::Idle);
        Ok(())
    }

    #[tokio::test]
    async fn test_resubmission_respects_max_steps() -> Result<()> {
        let button_turn = || {
            vec![
                start(),
                tool_call("call", "showButton"),
                finish(FinishReason::ToolCalls),
            ]
        };
        let transport = ScriptedTransport::new((0..5).map(|_| button_turn()).collect());
        let sent = Arc::clone(&transport.sent);
        let mut session = ChatSession::new(Box::new(transport)).with_max_steps(2);
        let mut prompt = RecordingPrompt::default();

        session.submit("Buttons forever", &mut prompt).await?;

        // the first request plus two automatic round trips
        assert_eq!(sent.lock().unwrap().len(), 3);
        assert_eq!(prompt.count("button"), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_server_tool_results_fill_their_invocation() -> Result<()> {
        let transport = ScriptedTransport::new(vec![vec![
            start(),
            StreamEvent::ToolCall {
                tool_call_id: "call_sushi".to_string(),
                tool_name: "UberEatsSushiRecommendations".to_string(),
                args: json!({}),
            },
            StreamEvent::ToolResult {
                tool_call_id: "call_sushi".to_string(),
                result: json!({"recommendations": ["Salmon Nigiri"]}),
            },
            text("Try the Salmon Nigiri."),
            finish(FinishReason::Stop),
        ]]);
        let mut session = ChatSession::new(Box::new(transport));
        let mut prompt = RecordingPrompt::default();

        session.submit("Recommend a sushi dish", &mut prompt).await?;

        let reply = &session.messages()[1];
        assert_eq!(reply.parts.len(), 2);
        let invocation = reply.invocations().next().unwrap();
        assert!(invocation.is_resolved());
        assert_eq!(
            invocation.result.as_ref().unwrap()["recommendations"],
            json!(["Salmon Nigiri"])
        );
        assert_eq!(reply.text(), "Try the Salmon Nigiri.");
        assert!(!session.is_button_visible());
        Ok(())
    }

    #[tokio::test]
    async fn test_error_event_marks_reply_failed() -> Result<()> {
        let transport = ScriptedTransport::new(vec![vec![
            start(),
            text("Partial"),
            StreamEvent::Error("Server error: 503".to_string()),
            finish(FinishReason::Error),
        ]]);
        let mut session = ChatSession::new(Box::new(transport));
        let mut prompt = RecordingPrompt::default();

        session.submit("Hi", &mut prompt).await?;

        assert_eq!(session.status(), ChatStatus::Idle);
        assert_eq!(session.error(), Some("Server error: 503"));
        assert!(session.messages()[1].failed);
        assert_eq!(prompt.count("focus"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_transport_failure_returns_to_idle() -> Result<()> {
        let transport = ScriptedTransport::with_results(vec![vec![
            Ok(start()),
            Err(anyhow!("connection reset")),
        ]]);
        let mut session = ChatSession::new(Box::new(transport));
        let mut prompt = RecordingPrompt::default();

        session.submit("Hi", &mut prompt).await?;

        assert_eq!(session.status(), ChatStatus::Idle);
        assert_eq!(session.error(), Some("connection reset"));
        assert!(prompt.calls.contains(&"error:connection reset".to_string()));

        // a failed turn does not block the next one
        session.submit("Again", &mut prompt).await?;
        assert_eq!(session.error(), Some("no scripted response left"));
        assert_eq!(prompt.count("focus"), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_request_marks_the_user_message() -> Result<()> {
        let transport = ScriptedTransport::new(vec![]);
        let mut session = ChatSession::new(Box::new(transport));
        let mut prompt = RecordingPrompt::default();

        session.submit("Recommend a sushi dish", &mut prompt).await?;

        // nothing streamed, so there is no reply to mark
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].role, Role::User);
        assert!(session.messages()[0].failed);
        assert!(session.error().is_some());
        assert_eq!(session.status(), ChatStatus::Idle);
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_keeps_partial_reply() -> Result<()> {
        let transport = ScriptedTransport::new(vec![vec![start(), text("Thinking about")]]).hanging();
        let mut session = ChatSession::new(Box::new(transport));
        let stop = session.stop_handle();
        let mut prompt = RecordingPrompt::default();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop.stop();
        });
        session.submit("Tell me a story", &mut prompt).await?;

        assert_eq!(session.status(), ChatStatus::Idle);
        assert_eq!(session.messages()[1].text(), "Thinking about");
        assert!(!session.messages()[1].failed);
        assert!(session.error().is_none());
        assert_eq!(prompt.count("focus"), 1);
        Ok(())
    }
}
