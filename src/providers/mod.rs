mod openrouter;

pub use openrouter::{convert_messages, ChatCompletionRequest, OpenRouterClient};

use crate::core::config::AppConfig;
use crate::core::error::ProviderError;
use crate::core::provider::ChatBackend;
use std::sync::Arc;

/// Create the completion backend described by the config.
/// Any OpenAI-compatible endpoint works; OpenRouter is the default.
pub fn create_backend(config: &AppConfig) -> Result<Arc<dyn ChatBackend>, ProviderError> {
    let api_key = config.get_api_key().ok_or_else(|| {
        ProviderError::MissingApiKey(
            "OPENROUTER_API_KEY not set. Set via env var or config file.".into(),
        )
    })?;

    Ok(Arc::new(OpenRouterClient::new(
        api_key.to_string(),
        config.base_url.clone(),
        config.model.clone(),
    )))
}
