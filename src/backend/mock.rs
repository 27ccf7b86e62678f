//! Mock backend for local development and tests.
//!
//! Echoes the user's message back one character at a time, waiting a fixed
//! delay before each character to mimic inference latency.

use async_trait::async_trait;
use std::time::Duration;

use super::traits::{
    FragmentStream, GenerationBackend, GenerationRequest, VecFragmentSource,
};
use crate::error::BackendError;

/// Mock backend that simulates token-at-a-time generation.
pub struct MockBackend {
    /// Delay before each character.
    token_delay: Duration,
}

impl MockBackend {
    /// Create a mock backend with the default 500ms per-character delay.
    pub fn new() -> Self {
        Self::with_delay(Duration::from_millis(500))
    }

    /// Create with custom token delay.
    pub fn with_delay(token_delay: Duration) -> Self {
        Self { token_delay }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn stream(&self, request: GenerationRequest) -> Result<FragmentStream, BackendError> {
        tracing::debug!(
            request_id = %request.request_id,
            chars = request.prompt.chars().count(),
            "Mock generation started"
        );

        let delay = (!self.token_delay.is_zero()).then_some(self.token_delay);
        let chars: Vec<String> = request.prompt.chars().map(String::from).collect();

        Ok(Box::new(VecFragmentSource::from_texts(chars, delay)))
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
