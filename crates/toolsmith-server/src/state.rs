use std::sync::Arc;

use toolsmith::augmenter::Augmenter;
use toolsmith::providers::configs::ProviderConfig;

/// Shared application state. Everything here is read-only; each chat request
/// builds its own agent and tool registry from it.
#[derive(Clone)]
pub struct AppState {
    pub provider_config: ProviderConfig,
    pub backend_url: String,
    pub max_steps: usize,
    pub augmenter: Arc<dyn Augmenter>,
}
