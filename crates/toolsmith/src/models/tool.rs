use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a tool call is resolved.
///
/// Server tools run inside the step loop. Client tools are only announced to the
/// model; the client intercepts the call by name and answers it itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionSite {
    #[default]
    Server,
    Client,
}

/// A tool that can be used by a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does, the only signal the model has for choosing it
    pub description: String,
    /// A JSON schema defining the expected parameters for the tool
    pub input_schema: Value,
    /// Where calls to this tool get resolved
    #[serde(default)]
    pub execution_site: ExecutionSite,
}

impl Tool {
    /// Create a new server-side tool with the given name and description
    pub fn new<N, D>(name: N, description: D, input_schema: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            input_schema,
            execution_site: ExecutionSite::Server,
        }
    }

    /// Create a tool whose calls are resolved by the client
    pub fn client<N, D>(name: N, description: D, input_schema: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool::new(name, description, input_schema).with_execution_site(ExecutionSite::Client)
    }

    pub fn with_execution_site(mut self, site: ExecutionSite) -> Self {
        self.execution_site = site;
        self
    }

    pub fn is_client_side(&self) -> bool {
        self.execution_site == ExecutionSite::Client
    }
}

/// A tool call request that a system can execute
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// The name of the tool to execute
    pub name: String,
    /// The parameters for the execution
    pub arguments: Value,
}

impl ToolCall {
    /// Create a new ToolCall with the given name and parameters
    pub fn new<S: Into<String>>(name: S, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}
