//! Where the system prompt and the collaborator's built-in tools come from.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolCall};
use crate::prompt_template::load_prompt_file;
use crate::systems::System;

/// What the system prompt template needs to know about a system
#[derive(Clone, Debug, Serialize)]
pub struct SystemInfo {
    pub name: String,
    pub description: String,
    pub instructions: String,
}

impl SystemInfo {
    pub fn new(name: &str, description: &str, instructions: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            instructions: instructions.to_string(),
        }
    }

    pub fn of(system: &dyn System) -> Self {
        Self::new(system.name(), system.description(), system.instructions())
    }
}

/// The prompt every request starts from before it is augmented
pub fn base_prompt() -> Result<String> {
    Ok(load_prompt_file("base.md", &json!({}))?)
}

#[async_trait]
pub trait Augmenter: Send + Sync {
    /// Turn the base prompt into the system prompt the model sees
    async fn system_prompt(&self, base: &str, systems: &[SystemInfo]) -> Result<String>;

    /// The collaborator's built-in tools, if it has any
    async fn system(&self) -> Result<Option<Box<dyn System>>>;
}

/// Renders the base prompt and the instructions of each system through `system.md`
#[derive(Debug, Default, Clone)]
pub struct TemplateAugmenter;

impl TemplateAugmenter {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, base: &str, systems: &[SystemInfo]) -> Result<String> {
        let context = json!({
            "prompt": base.trim(),
            "systems": systems,
        });
        Ok(load_prompt_file("system.md", &context)?)
    }
}

#[async_trait]
impl Augmenter for TemplateAugmenter {
    async fn system_prompt(&self, base: &str, systems: &[SystemInfo]) -> Result<String> {
        self.render(base, systems)
    }

    async fn system(&self) -> Result<Option<Box<dyn System>>> {
        Ok(None)
    }
}

#[derive(Debug, Serialize)]
struct SystemPromptRequest<'a> {
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct SystemPromptResponse {
    system: String,
}

#[derive(Debug, Deserialize)]
struct RemoteToolSpec {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "empty_object_schema")]
    parameters: Value,
}

fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// A collaborator service that owns part of the prompt and a bundle of tools.
///
/// The secret key is passed through as a bearer token and never checked here;
/// a bad key shows up as whatever the collaborator answers.
pub struct RemoteAugmenter {
    client: Client,
    host: Url,
    secret_key: String,
    template: TemplateAugmenter,
}

impl RemoteAugmenter {
    pub fn new(host: &str, secret_key: impl Into<String>) -> Result<Self> {
        // keep any path prefix on the host when joining endpoint paths
        let host = if host.ends_with('/') {
            Url::parse(host)?
        } else {
            Url::parse(&format!("{}/", host))?
        };
        Ok(Self {
            client: Client::builder().build()?,
            host,
            secret_key: secret_key.into(),
            template: TemplateAugmenter::new(),
        })
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(anyhow!("Collaborator request failed: {} {}", status, body))
}

#[async_trait]
impl Augmenter for RemoteAugmenter {
    async fn system_prompt(&self, base: &str, systems: &[SystemInfo]) -> Result<String> {
        let prompt = self.template.render(base, systems)?;
        let url = self.host.join("v1/system-prompt")?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.secret_key)
            .json(&SystemPromptRequest { prompt: &prompt })
            .send()
            .await?;
        let body: SystemPromptResponse = check_status(response).await?.json().await?;
        Ok(body.system)
    }

    async fn system(&self) -> Result<Option<Box<dyn System>>> {
        let url = self.host.join("v1/tools")?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        let specs: Vec<RemoteToolSpec> = check_status(response).await?.json().await?;
        let tools = specs
            .into_iter()
            .map(|spec| Tool::new(spec.name, spec.description, spec.parameters))
            .collect();

        let system: Box<dyn System> = Box::new(CollaboratorSystem {
            tools,
            client: self.client.clone(),
            host: self.host.clone(),
            secret_key: self.secret_key.clone(),
        });
        Ok(Some(system))
    }
}

/// The collaborator's tools, executed by the collaborator itself
struct CollaboratorSystem {
    tools: Vec<Tool>,
    client: Client,
    host: Url,
    secret_key: String,
}

#[async_trait]
impl System for CollaboratorSystem {
    fn name(&self) -> &str {
        "CollaboratorSystem"
    }

    fn description(&self) -> &str {
        "Built-in tools supplied by the augmentation collaborator"
    }

    fn instructions(&self) -> &str {
        ""
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Value> {
        let url = self
            .host
            .join(&format!("v1/tools/{}", urlencoding::encode(&tool_call.name)))
            .map_err(|e| AgentError::Internal(e.to_string()))?;

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.secret_key)
            .json(&tool_call.arguments)
            .send()
            .await
            .map_err(|e| AgentError::ExecutionError(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json::<Value>()
                .await
                .map_err(|e| AgentError::ExecutionError(e.to_string())),
            StatusCode::NOT_FOUND => Err(AgentError::ToolNotFound(tool_call.name)),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(AgentError::ExecutionError(format!("{}: {}", status, body)))
            }
        }
    }
}
