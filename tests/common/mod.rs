//! Shared fixtures for gateway integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;

use sse_chat_gateway::backend::{
    Fragment, FragmentSource, FragmentStream, GenerationBackend, GenerationRequest, NextFragment,
    VecFragmentSource,
};
use sse_chat_gateway::config::Config;
use sse_chat_gateway::error::BackendError;
use sse_chat_gateway::server::{create_router, AppState};
use sse_chat_gateway::shutdown::ShutdownCoordinator;

/// Config with keep-alives off and a short backend open timeout.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.keep_alive_secs = 0;
    config.backend.timeout_secs = 1;
    config
}

pub fn app_state(backend: Arc<dyn GenerationBackend>, config: Config) -> AppState {
    AppState::new(config, backend, ShutdownCoordinator::new())
}

pub fn router(state: &AppState) -> Router {
    create_router(state.clone())
}

pub fn chat_request(body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_owned()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Read the whole response body as UTF-8.
pub async fn body_string(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Read the next data frame of a streaming body.
pub async fn next_frame(body: &mut Body) -> Option<String> {
    loop {
        let frame = body.frame().await?.unwrap();
        if let Ok(data) = frame.into_data() {
            return Some(String::from_utf8(data.to_vec()).unwrap());
        }
    }
}

/// Backend that yields a fixed script, optionally failing at the end.
pub struct ScriptedBackend {
    texts: Vec<String>,
    fail_with: Option<String>,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    pub fn new<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            texts: texts.into_iter().map(Into::into).collect(),
            fail_with: None,
            delay: None,
        }
    }

    /// Fail with a stream error after the scripted texts.
    pub fn failing_after(mut self, detail: &str) -> Self {
        self.fail_with = Some(detail.to_owned());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn stream(&self, _request: GenerationRequest) -> Result<FragmentStream, BackendError> {
        let mut items: Vec<Result<Fragment, BackendError>> = self
            .texts
            .iter()
            .map(|t| Ok(Fragment::text(t.clone())))
            .collect();
        if let Some(detail) = &self.fail_with {
            items.push(Err(BackendError::Stream(detail.clone())));
        }
        Ok(Box::new(VecFragmentSource::new(items, self.delay)))
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// What an [`EndlessBackend`] source has done.
#[derive(Default)]
pub struct SourceStats {
    pub released: AtomicBool,
    pub pulls: AtomicUsize,
}

impl SourceStats {
    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }
}

/// Backend producing `tok0`, `tok1`, ... forever at a fixed pace.
pub struct EndlessBackend {
    pub stats: Arc<SourceStats>,
    interval: Duration,
}

impl EndlessBackend {
    pub fn new(interval: Duration) -> Self {
        Self {
            stats: Arc::new(SourceStats::default()),
            interval,
        }
    }
}

struct EndlessSource {
    stats: Arc<SourceStats>,
    interval: Duration,
    produced: usize,
}

impl FragmentSource for EndlessSource {
    fn next(&mut self) -> NextFragment<'_> {
        Box::pin(async move {
            tokio::time::sleep(self.interval).await;
            self.stats.pulls.fetch_add(1, Ordering::SeqCst);
            let text = format!("tok{}", self.produced);
            self.produced += 1;
            Some(Ok(Fragment::text(text)))
        })
    }
}

impl Drop for EndlessSource {
    fn drop(&mut self) {
        self.stats.released.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl GenerationBackend for EndlessBackend {
    fn name(&self) -> &'static str {
        "endless"
    }

    async fn stream(&self, _request: GenerationRequest) -> Result<FragmentStream, BackendError> {
        Ok(Box::new(EndlessSource {
            stats: self.stats.clone(),
            interval: self.interval,
            produced: 0,
        }))
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Backend that cannot be reached.
pub struct FailingBackend;

#[async_trait]
impl GenerationBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn stream(&self, _request: GenerationRequest) -> Result<FragmentStream, BackendError> {
        Err(BackendError::Connection("connection refused".to_string()))
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        Err(BackendError::Connection("unhealthy".to_string()))
    }
}

/// Backend that never finishes opening.
pub struct HangingBackend;

#[async_trait]
impl GenerationBackend for HangingBackend {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn stream(&self, _request: GenerationRequest) -> Result<FragmentStream, BackendError> {
        std::future::pending().await
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Backend whose first open succeeds with a paced script; every later open fails.
pub struct OpenOnceBackend {
    opens: AtomicUsize,
    texts: Vec<String>,
    delay: Duration,
}

impl OpenOnceBackend {
    pub fn new<I, S>(texts: I, delay: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            opens: AtomicUsize::new(0),
            texts: texts.into_iter().map(Into::into).collect(),
            delay,
        }
    }
}

#[async_trait]
impl GenerationBackend for OpenOnceBackend {
    fn name(&self) -> &'static str {
        "open-once"
    }

    async fn stream(&self, _request: GenerationRequest) -> Result<FragmentStream, BackendError> {
        if self.opens.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(BackendError::Connection("connection refused".to_string()));
        }
        Ok(Box::new(VecFragmentSource::from_texts(
            self.texts.clone(),
            Some(self.delay),
        )))
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
