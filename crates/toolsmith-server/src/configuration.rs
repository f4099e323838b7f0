use crate::error::{to_env_var, ConfigError};
use crate::state::AppState;
use config::{Config, Environment};
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::sync::Arc;
use toolsmith::{
    agent::DEFAULT_MAX_STEPS,
    augmenter::{Augmenter, RemoteAugmenter, TemplateAugmenter},
    providers::configs::{OpenAiProviderConfig, ProviderConfig},
    systems::backend::DEFAULT_BACKEND_URL,
};

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
}

impl ProviderSettings {
    // Convert to the toolsmith ProviderConfig
    pub fn into_config(self) -> ProviderConfig {
        match self {
            ProviderSettings::OpenAi {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BackendSettings {
    #[serde(default = "default_backend_url")]
    pub url: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
        }
    }
}

/// The tool-augmentation collaborator. Without a host the prompt is rendered
/// locally and no collaborator tools are offered.
#[derive(Debug, Default, Deserialize)]
pub struct AugmenterSettings {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

impl AugmenterSettings {
    pub fn build(&self) -> anyhow::Result<Arc<dyn Augmenter>> {
        match &self.host {
            Some(host) => {
                let secret_key = self.secret_key.clone().unwrap_or_default();
                Ok(Arc::new(RemoteAugmenter::new(host, secret_key)?))
            }
            None => Ok(Arc::new(TemplateAugmenter::new())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub augmenter: AugmenterSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        // Start with default configuration
        let config = Config::builder()
            // Server defaults
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            // Provider defaults
            .set_default("provider.host", default_openai_host())?
            .set_default("provider.model", default_model())?
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("TOOLSMITH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        // Try to deserialize the configuration
        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        // Handle missing field errors specially
        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if let Some(field) = missing_field(&error_str) {
                    let env_var = to_env_var(&qualify_field(field));
                    Err(ConfigError::MissingEnvVar { env_var })
                } else if let config::ConfigError::NotFound(field) = &err {
                    let env_var = to_env_var(field);
                    Err(ConfigError::MissingEnvVar { env_var })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }

    /// Split the settings into the state every request handler reads
    pub fn into_state(self) -> anyhow::Result<AppState> {
        Ok(AppState {
            augmenter: self.augmenter.build()?,
            provider_config: self.provider.into_config(),
            backend_url: self.backend.url,
            max_steps: self.agent.max_steps,
        })
    }
}

/// Extract the field name from a message like "missing field `type`"
fn missing_field(error: &str) -> Option<&str> {
    let rest = error.split("missing field `").nth(1)?;
    rest.split('`').next()
}

// Only the provider table has required fields
fn qualify_field(field: &str) -> String {
    match field {
        "type" | "api_key" => format!("provider.{}", field),
        other => other.to_string(),
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_openai_host() -> String {
    "https://api.openai.com".to_string()
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}

fn default_max_steps() -> usize {
    DEFAULT_MAX_STEPS
}
