//! Shared HTTP client builder for remote generation backends.

use reqwest::Client;
use std::time::Duration;

use crate::config::OpenAIConfig;
use crate::error::BackendError;

/// Build an HTTP client suited to long-lived SSE responses.
///
/// No overall request timeout is set: an answer may legitimately stream for
/// minutes. `timeout` bounds connection setup and the gap between two reads,
/// so a stalled upstream still surfaces as an error.
pub fn build_streaming_client(
    config: &OpenAIConfig,
    timeout: Duration,
) -> Result<Client, BackendError> {
    let mut builder = Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .tcp_keepalive(Duration::from_secs(60));

    if config.insecure_ssl {
        builder = builder.danger_accept_invalid_certs(true);
        tracing::warn!("TLS certificate verification disabled (insecure_ssl=true)");
    }

    tracing::debug!(
        api_base = %config.api_base,
        timeout_secs = timeout.as_secs(),
        pool_max_idle_per_host = config.pool_max_idle_per_host,
        "Streaming HTTP client configured"
    );

    builder
        .build()
        .map_err(|e| BackendError::Connection(e.to_string()))
}
