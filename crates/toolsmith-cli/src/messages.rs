//! The conversation as the client holds it, and its `useChat` wire shape.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use toolsmith::models::role::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationState {
    Call,
    Result,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub state: InvocationState,
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl ToolInvocation {
    pub fn call<I: Into<String>, N: Into<String>>(tool_call_id: I, tool_name: N, args: Value) -> Self {
        Self {
            state: InvocationState::Call,
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args,
            result: None,
        }
    }

    pub fn resolve(&mut self, result: Value) {
        self.state = InvocationState::Result;
        self.result = Some(result);
    }

    pub fn is_resolved(&self) -> bool {
        self.state == InvocationState::Result
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiPart {
    Text(String),
    ToolInvocation(ToolInvocation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UiMessage {
    pub id: String,
    pub role: Role,
    pub parts: Vec<UiPart>,
    /// Set on the reply whose response failed, or on the user's message when no reply arrived
    pub failed: bool,
}

/// One entry of the `messages` array posted to `/api/chat`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage<'a> {
    id: &'a str,
    role: Role,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_invocations: Vec<&'a ToolInvocation>,
    /// Text and invocations in generation order
    parts: Vec<WirePart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WirePart<'a> {
    Text {
        text: &'a str,
    },
    ToolInvocation {
        #[serde(rename = "toolInvocation")]
        tool_invocation: &'a ToolInvocation,
    },
}

impl UiMessage {
    fn new(role: Role) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            parts: Vec::new(),
            failed: false,
        }
    }

    pub fn user<S: Into<String>>(text: S) -> Self {
        let mut message = Self::new(Role::User);
        message.parts.push(UiPart::Text(text.into()));
        message
    }

    pub fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    /// Extend the trailing text part, or start one after a tool part
    pub fn push_text(&mut self, delta: &str) {
        if let Some(UiPart::Text(text)) = self.parts.last_mut() {
            text.push_str(delta);
            return;
        }
        self.parts.push(UiPart::Text(delta.to_string()));
    }

    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                UiPart::Text(text) => Some(text.as_str()),
                UiPart::ToolInvocation(_) => None,
            })
            .collect()
    }

    pub fn invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.parts.iter().filter_map(|part| match part {
            UiPart::ToolInvocation(invocation) => Some(invocation),
            UiPart::Text(_) => None,
        })
    }

    pub fn invocation_mut(&mut self, tool_call_id: &str) -> Option<&mut ToolInvocation> {
        self.parts.iter_mut().find_map(|part| match part {
            UiPart::ToolInvocation(invocation) if invocation.tool_call_id == tool_call_id => {
                Some(invocation)
            }
            _ => None,
        })
    }

    pub fn to_wire(&self) -> WireMessage<'_> {
        WireMessage {
            id: &self.id,
            role: self.role,
            content: self.text(),
            tool_invocations: self.invocations().collect(),
            parts: self
                .parts
                .iter()
                .map(|part| match part {
                    UiPart::Text(text) => WirePart::Text { text },
                    UiPart::ToolInvocation(tool_invocation) => {
                        WirePart::ToolInvocation { tool_invocation }
                    }
                })
                .collect(),
        }
    }
}
