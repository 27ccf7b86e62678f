//! Incoming chat request parsing and validation.

use serde::Deserialize;

use crate::error::ValidationError;

/// A validated chat request. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatRequest {
    /// The user message. Never empty after validation.
    pub message: String,

    /// Opaque correlation id; empty means no correlation was requested.
    #[serde(default)]
    pub session_id: String,
}

impl ChatRequest {
    /// Parse and validate a raw JSON request body.
    pub fn from_json(body: &[u8]) -> Result<Self, ValidationError> {
        let request: ChatRequest = serde_json::from_slice(body)
            .map_err(|e| ValidationError::MalformedBody(e.to_string()))?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.message.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        Ok(())
    }

    pub fn session_id(&self) -> Option<&str> {
        (!self.session_id.is_empty()).then_some(self.session_id.as_str())
    }
}
