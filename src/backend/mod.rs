//! Generation backends.

mod client;
mod mock;
mod openai;
mod traits;

pub use client::build_streaming_client;
pub use mock::MockBackend;
pub use openai::OpenAIBackend;
pub use traits::{
    Fragment, FragmentSource, FragmentStream, GenerationBackend, GenerationRequest, NextFragment,
    VecFragmentSource,
};

use std::sync::Arc;

use crate::config::BackendConfig;
use crate::error::BackendError;

/// Create a backend from configuration.
pub fn create_backend(config: &BackendConfig) -> Result<Arc<dyn GenerationBackend>, BackendError> {
    match config.provider.as_str() {
        "mock" | "local" => Ok(Arc::new(MockBackend::with_delay(config.mock.token_delay()))),
        "openai" => {
            let api_key = config.openai.api_key.clone().ok_or_else(|| {
                BackendError::Config(
                    "OpenAI API key not configured. Set OPENAI_API_KEY or backend.openai.api_key"
                        .to_string(),
                )
            })?;

            let client = build_streaming_client(&config.openai, config.timeout())?;

            Ok(Arc::new(
                OpenAIBackend::new(
                    client,
                    api_key,
                    config.openai.api_base.clone(),
                    config.default_model.clone(),
                )
                .with_system_prompt(config.system_prompt.clone())
                .with_sampling(config.openai.temperature, config.openai.max_tokens),
            ))
        }
        other => Err(BackendError::Config(format!(
            "Unknown backend provider: {}. Available: mock, local, openai",
            other
        ))),
    }
}
