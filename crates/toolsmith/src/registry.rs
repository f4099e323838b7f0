//! The per-request tool set: every system's tools merged into one keyed map.
use std::collections::HashMap;

use serde_json::Value;

use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolCall};
use crate::schema::prepare_arguments;
use crate::systems::System;

struct RegisteredTool {
    tool: Tool,
    system: usize,
}

/// Tools keyed by name, each remembering the system that resolves it.
///
/// Systems are overlaid in the order they are added. A later tool with an
/// existing name replaces the earlier one in place and a warning is logged.
#[derive(Default)]
pub struct ToolRegistry {
    systems: Vec<Box<dyn System>>,
    order: Vec<String>,
    entries: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collaborator tools first, local tools overlaid on top
    pub fn compose(
        collaborator: Option<Box<dyn System>>,
        local: impl IntoIterator<Item = Box<dyn System>>,
    ) -> Self {
        let mut registry = Self::new();
        if let Some(system) = collaborator {
            registry.add_system(system);
        }
        for system in local {
            registry.add_system(system);
        }
        registry
    }

    pub fn add_system(&mut self, system: Box<dyn System>) {
        let index = self.systems.len();
        for tool in system.tools() {
            let entry = RegisteredTool {
                tool: tool.clone(),
                system: index,
            };
            match self.entries.insert(tool.name.clone(), entry) {
                Some(previous) => {
                    tracing::warn!(
                        tool = %tool.name,
                        replaced = %self.systems[previous.system].name(),
                        by = %system.name(),
                        "tool name collision, keeping the later definition"
                    );
                }
                None => self.order.push(tool.name.clone()),
            }
        }
        self.systems.push(system);
    }

    pub fn systems(&self) -> impl Iterator<Item = &dyn System> {
        self.systems.iter().map(|s| &**s)
    }

    /// All tools in first-registration order
    pub fn tools(&self) -> Vec<Tool> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(|entry| entry.tool.clone())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.entries.get(name).map(|entry| &entry.tool)
    }

    /// Name of the system that resolves the named tool
    pub fn owner(&self, name: &str) -> Option<&str> {
        self.entries
            .get(name)
            .map(|entry| self.systems[entry.system].name())
    }

    pub fn is_client_tool(&self, name: &str) -> bool {
        self.get(name).is_some_and(|tool| tool.is_client_side())
    }

    /// Validate a call against its tool's schema and run it on the owning system
    pub async fn dispatch(&self, call: ToolCall) -> AgentResult<Value> {
        let entry = self
            .entries
            .get(&call.name)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;

        if entry.tool.is_client_side() {
            return Err(AgentError::ClientSide(call.name));
        }

        let arguments = prepare_arguments(&entry.tool.input_schema, call.arguments)?;
        tracing::info!(tool = %call.name, %arguments, "dispatching tool call");
        self.systems[entry.system]
            .call(ToolCall::new(call.name, arguments))
            .await
    }
}
