use anyhow::{anyhow, Result as AnyhowResult};
use async_trait::async_trait;
use indoc::indoc;
use reqwest::Client;
use serde_json::{json, Value};

use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolCall};
use crate::systems::{error_payload, System};

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";

/// Tools that proxy to the tool-generation backend service.
///
/// Every tool issues a single GET with its one parameter in the query string. There
/// is no timeout and no retry, so a hung backend stalls the step.
pub struct BackendSystem {
    tools: Vec<Tool>,
    client: Client,
    base_url: String,
}

impl BackendSystem {
    pub fn new(base_url: &str) -> AnyhowResult<Self> {
        let api_generation_tool = Tool::new(
            "APIGenerationTool",
            indoc! {"
                Generate an API call on the fly.
                It calls a backend service that generates an API call based on the desired API usage.
                For example, if the user wants to get some recommendations for a dish, and you realize you don't have a tool for that,
                you should use this tool to generate a new tool, in this case, a tool that queries the Uber Eats API.
            "},
            json!({
                "type": "object",
                "required": ["api_usage_needed"],
                "properties": {
                    "api_usage_needed": {
                        "type": "string",
                        "description": "What the generated API call needs to do."
                    }
                }
            }),
        );

        let deploy_tool = Tool::new(
            "deployNewTool",
            "Deploy a new tool so this tool can be used in the future.",
            json!({
                "type": "object",
                "required": ["tool_name"],
                "properties": {
                    "tool_name": {
                        "type": "string",
                        "description": "The name of the generated tool to deploy."
                    }
                }
            }),
        );

        let sushi_tool = Tool::new(
            "UberEatsSushiRecommendations",
            "Fetch sushi recommendations from UberEats based on the type of dish requested.",
            json!({
                "type": "object",
                "required": [],
                "properties": {
                    "dish_type": {
                        "type": "string",
                        "default": "sushi",
                        "description": "The kind of dish to get recommendations for."
                    }
                }
            }),
        );

        let steam_tool = Tool::new(
            "SteamGameRecommendations",
            "Fetch Steam game recommendations based on the type of game requested.",
            json!({
                "type": "object",
                "required": [],
                "properties": {
                    "game_type": {
                        "type": "string",
                        "default": "action",
                        "description": "The genre of game to get recommendations for."
                    }
                }
            }),
        );

        Ok(Self {
            tools: vec![api_generation_tool, deploy_tool, sushi_tool, steam_tool],
            client: Client::builder().build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// GET `{base}/{path}?{key}={value}` and decode the JSON body
    async fn fetch(&self, path: &str, key: &str, value: &str) -> AnyhowResult<Value> {
        let url = format!(
            "{}/{}?{}={}",
            self.base_url,
            path,
            key,
            urlencoding::encode(value)
        );
        tracing::debug!(%url, "calling backend");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("HTTP error! status: {}", status));
        }
        Ok(response.json().await?)
    }

    async fn generate_api(&self, params: Value) -> AgentResult<Value> {
        let usage = string_param(&params, "api_usage_needed")?;
        tracing::info!(api_usage_needed = %usage, "requesting api generation");

        match self
            .fetch("run-integuru", "api_usage_needed", &usage)
            .await
        {
            Ok(data) => Ok(json!({
                "status": format!("Successfully sent request to generate API call for {}", usage),
                "prompt_to_user": format!(
                    "Tell user that you have started generating an API call that does {} and will tell them when it's done. \
                    In the meantime, you can continue to help them with their other request.",
                    usage
                ),
                "tool_response": data,
            })),
            Err(e) => {
                tracing::error!("Error generating API call: {}", e);
                Ok(error_payload("Could not generate API call"))
            }
        }
    }

    async fn deploy_tool(&self, params: Value) -> AgentResult<Value> {
        let tool_name = string_param(&params, "tool_name")?;
        tracing::info!(%tool_name, "deploying generated tool");

        match self.fetch("deploy-tool", "tool_name", &tool_name).await {
            Ok(data) => {
                tracing::debug!(response = %data, "deploy-tool response");
                Ok(json!({
                    "status": data.get("status").cloned().unwrap_or(Value::Null),
                    "prompt_to_user": "Tell user that you have deployed a new tool and will tell them what it is.",
                    "tool_response": data,
                }))
            }
            Err(e) => {
                tracing::error!("Error deploying new tool: {}", e);
                Ok(error_payload("Could not deploy new tool"))
            }
        }
    }

    async fn sushi_recommendations(&self, params: Value) -> AgentResult<Value> {
        let dish_type = string_param(&params, "dish_type")?;

        match self
            .fetch("ubereats-sushi-recommendations", "dish_type", &dish_type)
            .await
        {
            Ok(data) => Ok(json!({
                "status": "Successfully fetched sushi recommendations",
                "recommendations": data.get("results").cloned().unwrap_or(Value::Null),
            })),
            Err(e) => {
                tracing::error!("Error fetching sushi recommendations: {}", e);
                Ok(error_payload("Could not fetch sushi recommendations"))
            }
        }
    }

    async fn steam_recommendations(&self, params: Value) -> AgentResult<Value> {
        let game_type = string_param(&params, "game_type")?;

        match self.fetch("run-steam-rec", "game_type", &game_type).await {
            Ok(data) => Ok(json!({
                "status": data.get("status").cloned().unwrap_or(Value::Null),
                "recommendations": data.get("results").cloned().unwrap_or(Value::Null),
            })),
            Err(e) => {
                tracing::error!("Error fetching Steam game recommendations: {}", e);
                Ok(error_payload("Could not fetch Steam game recommendations"))
            }
        }
    }
}

fn string_param(params: &Value, name: &str) -> AgentResult<String> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| AgentError::InvalidParameters(format!("'{}' parameter required", name)))
}

#[async_trait]
impl System for BackendSystem {
    fn name(&self) -> &str {
        "BackendSystem"
    }

    fn description(&self) -> &str {
        "Generates, deploys and runs tools through the tool-generation backend"
    }

    fn instructions(&self) -> &str {
        indoc! {"
            Whenever you feel like you need a new tool/api, use the APIGenerationTool tool to generate it,
            then deployNewTool once it is ready. Use the recommendation tools when the user asks for
            dishes or games.
        "}
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Value> {
        match tool_call.name.as_str() {
            "APIGenerationTool" => self.generate_api(tool_call.arguments).await,
            "deployNewTool" => self.deploy_tool(tool_call.arguments).await,
            "UberEatsSushiRecommendations" => self.sushi_recommendations(tool_call.arguments).await,
            "SteamGameRecommendations" => self.steam_recommendations(tool_call.arguments).await,
            _ => Err(AgentError::ToolNotFound(tool_call.name)),
        }
    }
}
