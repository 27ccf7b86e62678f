//! OpenAI-compatible remote inference backend.
//!
//! Streams the Chat Completions API (`stream: true`) and turns each content
//! delta into a fragment. Works against any server speaking the same
//! protocol (OpenAI, vLLM, Ollama's `/v1`, llama.cpp server).

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource};
use serde::{Deserialize, Serialize};

use super::traits::{
    Fragment, FragmentSource, FragmentStream, GenerationBackend, GenerationRequest, NextFragment,
};
use crate::error::BackendError;

/// Remote backend speaking the OpenAI streaming protocol.
pub struct OpenAIBackend {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    system_prompt: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OpenAIBackend {
    pub fn new(client: Client, api_key: String, api_base: String, model: String) -> Self {
        Self {
            client,
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            model,
            system_prompt: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    pub fn with_sampling(mut self, temperature: Option<f32>, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn request_body(&self, prompt: String) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });

        ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: true,
        }
    }
}

#[async_trait]
impl GenerationBackend for OpenAIBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn stream(&self, request: GenerationRequest) -> Result<FragmentStream, BackendError> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = self.request_body(request.prompt);

        let req = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body);

        let mut es = EventSource::new(req).map_err(|e| BackendError::Connection(e.to_string()))?;

        // Wait for the upstream to accept the request so that connection
        // failures are reported before the client sees a 200.
        match es.next().await {
            Some(Ok(Event::Open)) => {}
            Some(Ok(Event::Message(msg))) => {
                // Some servers skip the open event; keep the first message.
                return Ok(Box::new(OpenAIFragmentStream {
                    es,
                    pending: Some(msg.data),
                }));
            }
            Some(Err(e)) => return Err(map_eventsource_error(e)),
            None => return Err(BackendError::Stream("upstream closed before opening".into())),
        }

        Ok(Box::new(OpenAIFragmentStream { es, pending: None }))
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let url = format!("{}/models", self.api_base);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BackendError::Api {
                status: response.status().as_u16(),
                message: "Health check failed".to_string(),
            });
        }

        Ok(())
    }
}

/// Fragment stream over an upstream event source.
///
/// Dropping it drops the `EventSource`, which aborts the upstream request.
struct OpenAIFragmentStream {
    es: EventSource,
    pending: Option<String>,
}

impl FragmentSource for OpenAIFragmentStream {
    fn next(&mut self) -> NextFragment<'_> {
        Box::pin(async move {
            if let Some(data) = self.pending.take() {
                if let Some(result) = parse_chunk(&data) {
                    return Some(result);
                }
            }

            loop {
                match self.es.next().await {
                    Some(Ok(Event::Open)) => continue,
                    Some(Ok(Event::Message(msg))) => {
                        if let Some(result) = parse_chunk(&msg.data) {
                            return Some(result);
                        }
                    }
                    Some(Err(EventSourceError::StreamEnded)) | None => {
                        self.es.close();
                        return None;
                    }
                    Some(Err(e)) => {
                        self.es.close();
                        return Some(Err(map_eventsource_error(e)));
                    }
                }
            }
        })
    }
}

/// Translate one upstream `data:` payload.
///
/// Returns `None` for chunks that carry nothing to forward (role announcements,
/// empty deltas).
fn parse_chunk(data: &str) -> Option<Result<Fragment, BackendError>> {
    if data.trim() == "[DONE]" {
        return Some(Ok(Fragment::last("")));
    }

    let chunk = match serde_json::from_str::<ChatCompletionChunk>(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            return Some(Err(BackendError::Parse(format!(
                "Failed to parse chunk: {}",
                e
            ))))
        }
    };

    if let Some(error) = chunk.error {
        return Some(Err(BackendError::Api {
            status: 500,
            message: error.message,
        }));
    }

    let choice = chunk.choices.into_iter().next()?;
    let content = choice.delta.content.unwrap_or_default();

    match (content.is_empty(), choice.finish_reason.is_some()) {
        (_, true) => Some(Ok(Fragment::last(content))),
        (false, false) => Some(Ok(Fragment::text(content))),
        (true, false) => None,
    }
}

fn map_eventsource_error(err: EventSourceError) -> BackendError {
    match err {
        EventSourceError::InvalidStatusCode(status, _) => match status {
            StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimited,
            StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => BackendError::Timeout,
            other => BackendError::Api {
                status: other.as_u16(),
                message: other.canonical_reason().unwrap_or("unexpected status").to_string(),
            },
        },
        EventSourceError::Transport(e) if e.is_timeout() => BackendError::Timeout,
        EventSourceError::Transport(e) => BackendError::Http(e.to_string()),
        other => BackendError::Stream(other.to_string()),
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<UpstreamError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpstreamError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_delta_becomes_fragment() {
        let data = r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        assert_eq!(parse_chunk(data).unwrap().unwrap(), Fragment::text("Hel"));
    }

    #[test]
    fn test_role_announcement_is_skipped() {
        let data = r#"{"choices":[{"delta":{"role":"assistant"},"finish_reason":null}]}"#;
        assert!(parse_chunk(data).is_none());
    }

    #[test]
    fn test_finish_reason_ends_the_sequence() {
        let data = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert_eq!(parse_chunk(data).unwrap().unwrap(), Fragment::last(""));

        let data = r#"{"choices":[{"delta":{"content":"!"},"finish_reason":"length"}]}"#;
        assert_eq!(parse_chunk(data).unwrap().unwrap(), Fragment::last("!"));
    }

    #[test]
    fn test_done_marker_ends_the_sequence() {
        assert!(parse_chunk("[DONE]").unwrap().unwrap().last);
    }

    #[test]
    fn test_malformed_chunk_is_a_parse_error() {
        let result = parse_chunk("{not json").unwrap();
        assert!(matches!(result, Err(BackendError::Parse(_))));
    }

    #[test]
    fn test_inline_error_object_is_reported() {
        let data = r#"{"error":{"message":"context length exceeded"}}"#;
        assert!(matches!(
            parse_chunk(data).unwrap(),
            Err(BackendError::Api { .. })
        ));
    }

    #[test]
    fn test_request_body_includes_system_prompt() {
        let backend = OpenAIBackend::new(
            Client::new(),
            "sk-test".into(),
            "http://localhost:8080/v1/".into(),
            "gpt-4o-mini".into(),
        )
        .with_system_prompt(Some("Be brief.".into()))
        .with_sampling(Some(0.2), None);

        assert_eq!(backend.api_base, "http://localhost:8080/v1");

        let body = serde_json::to_value(backend.request_body("hi".into())).unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["stream"], true);
        assert!(body.get("max_tokens").is_none());
    }
}
