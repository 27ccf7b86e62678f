//! Backend trait definitions.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::BackendError;
use crate::streaming::ChatRequest;

/// A generation backend that produces answer text incrementally.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Backend name for metrics/logging.
    fn name(&self) -> &'static str;

    /// Open a lazy fragment sequence for the given request.
    ///
    /// Errors here mean the backend could not be reached at all; failures after
    /// the sequence is open are reported by [`FragmentSource::next`].
    async fn stream(&self, request: GenerationRequest) -> Result<FragmentStream, BackendError>;

    /// Health check for the backend.
    async fn health_check(&self) -> Result<(), BackendError>;
}

/// What a backend is asked to generate.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The user message.
    pub prompt: String,
    /// Caller-supplied correlation id, empty when none was given.
    pub session_id: String,
    /// Gateway-assigned id for log correlation.
    pub request_id: String,
}

impl GenerationRequest {
    pub fn from_chat(chat: &ChatRequest, request_id: impl Into<String>) -> Self {
        Self {
            prompt: chat.message.clone(),
            session_id: chat.session_id.clone(),
            request_id: request_id.into(),
        }
    }
}

/// One unit of incrementally produced answer text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Text of this fragment.
    pub text: String,
    /// The backend has nothing after this fragment.
    pub last: bool,
}

impl Fragment {
    /// Create a text fragment.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            last: false,
        }
    }

    /// Create a final fragment, possibly carrying trailing text.
    pub fn last(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            last: true,
        }
    }
}

/// Boxed future returned by [`FragmentSource::next`].
pub type NextFragment<'a> =
    Pin<Box<dyn Future<Output = Option<Result<Fragment, BackendError>>> + Send + 'a>>;

/// Owned, type-erased fragment sequence.
pub type FragmentStream = Box<dyn FragmentSource>;

/// A lazy, ordered sequence of fragments.
///
/// `None` means the sequence is exhausted successfully; `Some(Err(_))` means it
/// failed. Dropping the source releases whatever the backend holds for it.
///
/// Implementations must be cancel-safe: if the returned future is dropped
/// before completion, no fragment may be lost.
pub trait FragmentSource: Send {
    /// Pull the next fragment.
    fn next(&mut self) -> NextFragment<'_>;
}

/// Vector-backed fragment source with an optional delay before each item.
pub struct VecFragmentSource {
    items: std::vec::IntoIter<Result<Fragment, BackendError>>,
    delay: Option<Duration>,
}

impl VecFragmentSource {
    pub fn new(items: Vec<Result<Fragment, BackendError>>, delay: Option<Duration>) -> Self {
        Self {
            items: items.into_iter(),
            delay,
        }
    }

    /// Source yielding the given texts in order, then exhausting.
    pub fn from_texts<I, S>(texts: I, delay: Option<Duration>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(|t| Ok(Fragment::text(t))).collect(), delay)
    }
}

impl FragmentSource for VecFragmentSource {
    fn next(&mut self) -> NextFragment<'_> {
        Box::pin(async move {
            // Sleep before taking the item so a dropped future loses nothing.
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            self.items.next()
        })
    }
}
