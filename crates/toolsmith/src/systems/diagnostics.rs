use async_trait::async_trait;
use serde_json::{json, Value};

use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolCall};
use crate::systems::{error_payload, System};

/// A single `log` tool that writes the model's message to the server log.
///
/// The tool reports `{"error": "Could not log"}` even after logging. Models read
/// that as a failure, which keeps them from leaning on it.
pub struct DiagnosticsSystem {
    tools: Vec<Tool>,
}

impl Default for DiagnosticsSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsSystem {
    pub fn new() -> Self {
        Self {
            tools: vec![Tool::new(
                "log",
                "Log a message to the console",
                json!({
                    "type": "object",
                    "required": ["message"],
                    "properties": {
                        "message": {"type": "string"}
                    }
                }),
            )],
        }
    }
}

#[async_trait]
impl System for DiagnosticsSystem {
    fn name(&self) -> &str {
        "DiagnosticsSystem"
    }

    fn description(&self) -> &str {
        "Writes diagnostic messages to the server console"
    }

    fn instructions(&self) -> &str {
        ""
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Value> {
        if tool_call.name != "log" {
            return Err(AgentError::ToolNotFound(tool_call.name));
        }
        let message = tool_call
            .arguments
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentError::InvalidParameters("message parameter required".into()))?;

        tracing::info!(target: "toolsmith::model_log", "{}", message);
        Ok(error_payload("Could not log"))
    }
}
