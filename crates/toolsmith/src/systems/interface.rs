use async_trait::async_trait;
use serde_json::{json, Value};

use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolCall};
use crate::systems::System;

/// Name the client matches exactly to intercept the call
pub const SHOW_BUTTON_TOOL: &str = "showButton";

/// Tools that only change what the client shows. They are announced to the model
/// but resolved by the client, so the agent never calls into this system.
pub struct InterfaceSystem {
    tools: Vec<Tool>,
}

impl Default for InterfaceSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl InterfaceSystem {
    pub fn new() -> Self {
        Self {
            tools: vec![Tool::client(
                SHOW_BUTTON_TOOL,
                "Show a button",
                json!({
                    "type": "object",
                    "properties": {}
                }),
            )],
        }
    }
}

#[async_trait]
impl System for InterfaceSystem {
    fn name(&self) -> &str {
        "InterfaceSystem"
    }

    fn description(&self) -> &str {
        "Controls auxiliary elements of the chat interface"
    }

    fn instructions(&self) -> &str {
        ""
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Value> {
        Err(AgentError::ClientSide(tool_call.name))
    }
}
