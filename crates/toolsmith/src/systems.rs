use async_trait::async_trait;
use serde_json::{json, Value};

use crate::errors::AgentResult;
use crate::models::tool::{Tool, ToolCall};

pub mod backend;
pub mod diagnostics;
pub mod interface;

pub use backend::BackendSystem;
pub use diagnostics::DiagnosticsSystem;
pub use interface::InterfaceSystem;

/// The payload a tool reports when it could not do its job
pub fn error_payload(message: &str) -> Value {
    json!({ "error": message })
}

/// Core trait that defines a system that can be operated by an AI agent
#[async_trait]
pub trait System: Send + Sync {
    /// Get the name of the system
    fn name(&self) -> &str;

    /// Get the system description
    fn description(&self) -> &str;

    /// Get system instructions, rendered into the system prompt
    fn instructions(&self) -> &str;

    /// Get available tools
    fn tools(&self) -> &[Tool];

    /// Call a tool with the given parameters.
    ///
    /// Arguments have already been validated against the tool's schema. Failures
    /// the model should read and react to are returned as `Ok` payloads; `Err`
    /// is reserved for calls the system cannot make sense of at all.
    async fn call(&self, tool_call: ToolCall) -> AgentResult<Value>;
}

/// The systems every chat request gets on top of whatever the augmenter supplies
pub fn local_systems(backend_url: &str) -> anyhow::Result<Vec<Box<dyn System>>> {
    Ok(vec![
        Box::new(DiagnosticsSystem::new()),
        Box::new(BackendSystem::new(backend_url)?),
        Box::new(InterfaceSystem::new()),
    ])
}
