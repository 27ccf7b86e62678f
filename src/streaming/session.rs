//! Stream session: pulls fragments from a backend and turns them into events.
//!
//! ```text
//!            fragment
//!           ┌────────┐
//!           ▼        │
//!        Active ─────┘
//!        │  │  │
//!  exhausted  │  cancel()
//!        │  error  │
//!        ▼  ▼      ▼
//! Completed Failed Cancelled
//! ```
//!
//! The session knows nothing about HTTP. The caller drives it with
//! [`StreamSession::next`] and writes whatever event comes back.

use std::time::Instant;

use crate::backend::{FragmentStream, GenerationBackend, GenerationRequest};
use crate::error::BackendError;
use crate::metrics;

use super::request::ChatRequest;
use super::sse::SseEvent;

/// Lifecycle state of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::Cancelled => "cancelled",
        }
    }
}

/// One request's streaming state. Exclusively owned by the call that started it.
pub struct StreamSession {
    request: ChatRequest,
    request_id: String,
    backend: &'static str,
    /// `None` once the backend sequence is exhausted or released.
    fragments: Option<FragmentStream>,
    state: SessionState,
    delivered: u64,
    opened_at: Instant,
}

impl StreamSession {
    /// Open the backend sequence and return an active session.
    ///
    /// Fails without creating a session if the backend cannot be opened.
    pub async fn start(
        backend: &dyn GenerationBackend,
        request: ChatRequest,
        request_id: impl Into<String>,
    ) -> Result<Self, BackendError> {
        let request_id = request_id.into();
        let opened_at = Instant::now();
        let fragments = backend
            .stream(GenerationRequest::from_chat(&request, request_id.clone()))
            .await?;

        tracing::debug!(
            request_id = %request_id,
            session_id = %request.session_id,
            backend = backend.name(),
            "Stream session started"
        );
        metrics::record_stream_started(backend.name());

        Ok(Self::from_parts(request, request_id, backend.name(), fragments, opened_at))
    }

    /// Build an active session around an already-open fragment sequence.
    pub fn from_parts(
        request: ChatRequest,
        request_id: String,
        backend: &'static str,
        fragments: FragmentStream,
        opened_at: Instant,
    ) -> Self {
        Self {
            request,
            request_id,
            backend,
            fragments: Some(fragments),
            state: SessionState::Active,
            delivered: 0,
            opened_at,
        }
    }

    /// Produce the next event, or `None` once the session is terminal.
    ///
    /// Exactly one terminal event (`done` or `error`) is returned before
    /// `None`; a cancelled session returns `None` straight away.
    pub async fn next(&mut self) -> Option<SseEvent> {
        if self.state.is_terminal() {
            return None;
        }

        let Some(fragments) = self.fragments.as_mut() else {
            return Some(self.complete());
        };

        match fragments.next().await {
            Some(Ok(fragment)) => {
                if fragment.last {
                    // Release the backend now; the next call reports completion.
                    self.fragments = None;
                    if fragment.text.is_empty() {
                        return Some(self.complete());
                    }
                }

                if self.delivered == 0 {
                    metrics::record_backend_ttfb(self.backend, self.opened_at.elapsed());
                }
                self.delivered += 1;
                tracing::trace!(
                    request_id = %self.request_id,
                    seq = self.delivered,
                    len = fragment.text.len(),
                    "Fragment delivered"
                );

                Some(SseEvent::message(fragment.text))
            }
            Some(Err(e)) => {
                metrics::record_backend_error(self.backend);
                tracing::error!(
                    request_id = %self.request_id,
                    session_id = %self.request.session_id,
                    backend = self.backend,
                    delivered = self.delivered,
                    error = %e,
                    "Backend stream error"
                );
                Some(self.fail(e.public_message()))
            }
            None => Some(self.complete()),
        }
    }

    /// Stop pulling, release the backend, and enter `Cancelled`.
    ///
    /// No event is produced: the client is already gone. No-op once terminal.
    pub fn cancel(&mut self) {
        if self.state.is_terminal() {
            return;
        }

        tracing::info!(
            request_id = %self.request_id,
            session_id = %self.request.session_id,
            delivered = self.delivered,
            "Stream cancelled"
        );
        self.finish(SessionState::Cancelled);
    }

    /// Terminate as `Failed` for a reason decided outside the backend
    /// (deadline, shutdown). Returns the error event to send, if still active.
    pub fn abort(&mut self, reason: &str) -> Option<SseEvent> {
        if self.state.is_terminal() {
            return None;
        }

        tracing::warn!(
            request_id = %self.request_id,
            session_id = %self.request.session_id,
            delivered = self.delivered,
            reason,
            "Stream aborted"
        );
        Some(self.fail(reason))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of `message` events produced so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn request(&self) -> &ChatRequest {
        &self.request
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    fn complete(&mut self) -> SseEvent {
        tracing::debug!(
            request_id = %self.request_id,
            delivered = self.delivered,
            "Stream completed"
        );
        self.finish(SessionState::Completed);
        SseEvent::done()
    }

    fn fail(&mut self, message: &str) -> SseEvent {
        self.finish(SessionState::Failed);
        SseEvent::error(message)
    }

    fn finish(&mut self, state: SessionState) {
        self.fragments = None;
        self.state = state;
        metrics::record_stream_finished(self.backend, state.as_str());
        metrics::record_stream_duration(self.opened_at.elapsed());
    }
}

impl Drop for StreamSession {
    /// A session dropped while active lost its consumer (client disconnect).
    fn drop(&mut self) {
        self.cancel();
    }
}
