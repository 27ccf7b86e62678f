//! Configuration loading from TOML files and environment variables.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::GatewayError;

/// Main configuration structure.
///
/// Loaded once at startup and shared read-only behind an `Arc`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub backend: BackendConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    pub listen_addr: String,

    /// Maximum concurrent chat streams (0 = unlimited).
    pub max_streams: usize,

    /// Overall deadline for one chat stream (seconds, 0 = none).
    pub request_timeout_secs: u64,

    /// Graceful shutdown drain timeout (seconds).
    pub shutdown_timeout_secs: u64,

    /// Interval for SSE keep-alive comments while the backend is silent (seconds, 0 = off).
    pub keep_alive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8000".to_string(),
            max_streams: 1024,
            request_timeout_secs: 0,
            shutdown_timeout_secs: 30,
            keep_alive_secs: 15,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn keep_alive(&self) -> Option<Duration> {
        (self.keep_alive_secs > 0).then(|| Duration::from_secs(self.keep_alive_secs))
    }
}

/// Cross-origin policy for browser clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins. A `"*"` entry allows any origin.
    pub allowed_origins: Vec<String>,

    /// Send `Access-Control-Allow-Credentials: true` (ignored for `"*"`).
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ],
            allow_credentials: true,
        }
    }
}

impl CorsConfig {
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

/// Generation backend selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend provider: "mock" (alias "local") or "openai".
    pub provider: String,

    /// Model requested from remote providers.
    pub default_model: String,

    /// Timeout for opening the backend stream and for idle reads (seconds).
    pub timeout_secs: u64,

    /// Optional system prompt prepended to every conversation.
    pub system_prompt: Option<String>,

    pub mock: MockConfig,

    pub openai: OpenAIConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            default_model: "gpt-4o-mini".to_string(),
            timeout_secs: 60,
            system_prompt: None,
            mock: MockConfig::default(),
            openai: OpenAIConfig::default(),
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Mock backend settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// Delay before each echoed character (milliseconds).
    pub token_delay_ms: u64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self { token_delay_ms: 500 }
    }
}

impl MockConfig {
    pub fn token_delay(&self) -> Duration {
        Duration::from_millis(self.token_delay_ms)
    }
}

/// OpenAI-compatible provider settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAIConfig {
    /// API key (can also be set via OPENAI_API_KEY env var).
    pub api_key: Option<String>,

    /// API base URL.
    pub api_base: String,

    /// Maximum idle connections per host in pool.
    pub pool_max_idle_per_host: usize,

    pub temperature: Option<f32>,

    pub max_tokens: Option<u32>,

    /// Skip TLS certificate verification (testing only).
    pub insecure_ssl: bool,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.openai.com/v1".to_string(),
            pool_max_idle_per_host: 32,
            temperature: None,
            max_tokens: None,
            insecure_ssl: false,
        }
    }
}

/// Metrics/Prometheus configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint.
    pub enabled: bool,

    /// Listen address for metrics server.
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn").
    pub level: String,

    /// Output format: "pretty" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, GatewayError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GatewayError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        toml::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from file, then apply environment variable overrides.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, GatewayError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());

        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        // Server
        if let Some(v) = lookup("GATEWAY_LISTEN_ADDR") {
            self.server.listen_addr = v;
        }
        if let Some(n) = parsed("GATEWAY_MAX_STREAMS") {
            self.server.max_streams = n as usize;
        }
        if let Some(n) = parsed("GATEWAY_REQUEST_TIMEOUT") {
            self.server.request_timeout_secs = n;
        }
        if let Some(n) = parsed("GATEWAY_SHUTDOWN_TIMEOUT") {
            self.server.shutdown_timeout_secs = n;
        }

        // CORS
        if let Some(v) = lookup("CORS_ORIGINS") {
            self.cors.allowed_origins = parse_origin_list(&v);
        }

        // Backend. GATEWAY_BACKEND wins over the legacy LLM_MODE name.
        if let Some(v) = lookup("GATEWAY_BACKEND").or_else(|| lookup("LLM_MODE")) {
            self.backend.provider = v;
        }
        if let Some(v) = lookup("OPENAI_MODEL") {
            self.backend.default_model = v;
        }
        if let Some(n) = parsed("GATEWAY_TOKEN_DELAY_MS") {
            self.backend.mock.token_delay_ms = n;
        }
        if let Some(v) = lookup("OPENAI_API_KEY").filter(|v| !v.is_empty()) {
            self.backend.openai.api_key = Some(v);
        }
        if let Some(v) = lookup("OPENAI_API_BASE") {
            self.backend.openai.api_base = v;
        }

        // Metrics
        if let Some(v) = lookup("GATEWAY_METRICS_ENABLED") {
            self.metrics.enabled = is_truthy(&v);
        }
        if let Some(v) = lookup("GATEWAY_METRICS_ADDR") {
            self.metrics.listen_addr = v;
        }

        // Logging
        if let Some(v) = lookup("GATEWAY_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("GATEWAY_LOG_FORMAT") {
            self.logging.format = v;
        }
        if lookup("DEBUG").is_some_and(|v| is_truthy(&v)) {
            self.logging.level = "debug".to_string();
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parse an origin list given either as a JSON array or comma-separated.
fn parse_origin_list(value: &str) -> Vec<String> {
    let value = value.trim();
    if value.starts_with('[') {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(value) {
            return list;
        }
    }

    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
