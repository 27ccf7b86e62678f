//! Binds a [`StreamSession`] to an HTTP response body.
//!
//! The body is a pull-driven byte stream: hyper polls it only when the
//! transport can take more data, so the backend is never read ahead of the
//! client. When the client goes away hyper drops the stream, which drops the
//! session mid-`Active` and cancels it.

use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::session::StreamSession;
use super::sse::{frame, keep_alive_comment, SseEvent};
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;

/// External signals that can end a stream early.
#[derive(Clone)]
pub struct StreamControl {
    /// Cancelled on client disconnect or by an explicit cancel request.
    pub cancel: CancellationToken,
    /// Cancelled when a newer stream takes over the same session id.
    pub superseded: CancellationToken,
    /// Process-wide shutdown.
    pub shutdown: ShutdownCoordinator,
    /// Overall deadline for the whole stream.
    pub deadline: Option<Instant>,
    /// Emit an SSE comment when the backend is silent this long.
    pub keep_alive: Option<Duration>,
}

impl StreamControl {
    pub fn new(cancel: CancellationToken, shutdown: ShutdownCoordinator) -> Self {
        Self {
            cancel,
            superseded: CancellationToken::new(),
            shutdown,
            deadline: None,
            keep_alive: None,
        }
    }

    pub fn with_superseded(mut self, superseded: CancellationToken) -> Self {
        self.superseded = superseded;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.deadline = timeout.map(|t| Instant::now() + t);
        self
    }

    pub fn with_keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive = interval;
        self
    }
}

enum Step {
    Event(Option<SseEvent>),
    KeepAlive,
    Cancelled,
    Superseded,
    ShuttingDown,
    TimedOut,
}

/// Turn a session into framed SSE bytes.
///
/// `resources` is held until the stream ends or is dropped; callers pass
/// their registry and connection guards here.
pub fn event_stream<R>(
    mut session: StreamSession,
    control: StreamControl,
    resources: R,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static
where
    R: Send + 'static,
{
    let span = tracing::info_span!(
        "stream",
        request_id = %session.request_id(),
        session_id = %session.request().session_id,
    );

    let stream = async_stream::stream! {
        let _resources = resources;

        loop {
            let step = {
                let pull = session.next().instrument(span.clone());
                tokio::pin!(pull);

                // Keep-alive ticks leave the in-flight pull untouched.
                loop {
                    let idle = sleep_or_pending(control.keep_alive.map(|d| Instant::now() + d));
                    let step = tokio::select! {
                        biased;
                        _ = control.cancel.cancelled() => Step::Cancelled,
                        _ = control.superseded.cancelled() => Step::Superseded,
                        _ = control.shutdown.wait_for_shutdown() => Step::ShuttingDown,
                        _ = sleep_or_pending(control.deadline) => Step::TimedOut,
                        event = &mut pull => Step::Event(event),
                        _ = idle => Step::KeepAlive,
                    };

                    match step {
                        Step::KeepAlive => {
                            tracing::trace!("Sending keep-alive");
                            yield Ok(keep_alive_comment());
                        }
                        other => break other,
                    }
                }
            };

            let event = match step {
                Step::Event(Some(event)) => event,
                Step::Event(None) => break,
                Step::Cancelled => {
                    session.cancel();
                    break;
                }
                Step::Superseded => match session.abort("superseded by a newer request") {
                    Some(event) => event,
                    None => break,
                },
                Step::ShuttingDown => match session.abort("server shutting down") {
                    Some(event) => event,
                    None => break,
                },
                Step::TimedOut => match session.abort("request timed out") {
                    Some(event) => event,
                    None => break,
                },
                Step::KeepAlive => continue,
            };

            let bytes = frame(&event);
            metrics::record_event_sent(event.kind().as_str(), bytes.len());
            yield Ok(bytes);

            if session.state().is_terminal() {
                break;
            }
        }

        tracing::debug!(
            request_id = %session.request_id(),
            state = session.state().as_str(),
            delivered = session.delivered(),
            "Response body closed"
        );
    };

    stream
}

async fn sleep_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Fragment, FragmentSource, NextFragment, VecFragmentSource};
    use crate::streaming::ChatRequest;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn session(source: impl FragmentSource + 'static) -> StreamSession {
        StreamSession::from_parts(
            ChatRequest {
                message: "x".into(),
                session_id: String::new(),
            },
            "req-1".into(),
            "test",
            Box::new(source),
            std::time::Instant::now(),
        )
    }

    /// Never produces anything.
    struct Silent;

    impl FragmentSource for Silent {
        fn next(&mut self) -> NextFragment<'_> {
            Box::pin(std::future::pending())
        }
    }

    async fn collect(stream: impl Stream<Item = Result<Bytes, Infallible>>) -> String {
        let chunks: Vec<_> = stream.collect().await;
        chunks
            .into_iter()
            .map(|c| String::from_utf8(c.unwrap().to_vec()).unwrap())
            .collect()
    }

    fn control() -> StreamControl {
        StreamControl::new(CancellationToken::new(), ShutdownCoordinator::new())
    }

    #[tokio::test]
    async fn test_body_is_framed_events_in_order() {
        let source = VecFragmentSource::from_texts(["h", "i"], Some(Duration::from_millis(5)));
        let body = collect(event_stream(session(source), control(), ())).await;
        assert_eq!(body, "data: h\n\ndata: i\n\nevent: done\ndata: \n\n");
    }

    #[tokio::test]
    async fn test_deadline_fails_the_stream() {
        let ctl = control().with_timeout(Some(Duration::from_millis(20)));
        let body = collect(event_stream(session(Silent), ctl, ())).await;
        assert_eq!(body, "event: error\ndata: request timed out\n\n");
    }

    #[tokio::test]
    async fn test_shutdown_fails_the_stream() {
        let ctl = control();
        ctl.shutdown.shutdown();
        let body = collect(event_stream(session(Silent), ctl, ())).await;
        assert_eq!(body, "event: error\ndata: server shutting down\n\n");
    }

    #[tokio::test]
    async fn test_cancel_token_ends_without_events() {
        let ctl = control();
        ctl.cancel.cancel();
        let source = VecFragmentSource::new(vec![Ok(Fragment::text("a"))], None);
        let body = collect(event_stream(session(source), ctl, ())).await;
        assert_eq!(body, "");
    }

    #[tokio::test]
    async fn test_superseded_stream_gets_error_event() {
        let ctl = control();
        ctl.superseded.cancel();
        let body = collect(event_stream(session(Silent), ctl, ())).await;
        assert_eq!(body, "event: error\ndata: superseded by a newer request\n\n");
    }

    #[tokio::test]
    async fn test_keep_alive_while_backend_is_silent() {
        let ctl = control()
            .with_keep_alive(Some(Duration::from_millis(10)))
            .with_timeout(Some(Duration::from_millis(55)));
        let body = collect(event_stream(session(Silent), ctl, ())).await;
        assert!(body.starts_with(": keep-alive\n\n"));
        assert!(body.ends_with("event: error\ndata: request timed out\n\n"));
    }

    #[tokio::test]
    async fn test_keep_alive_does_not_lose_fragments() {
        let source = VecFragmentSource::from_texts(["a", "b"], Some(Duration::from_millis(30)));
        let ctl = control().with_keep_alive(Some(Duration::from_millis(5)));
        let body = collect(event_stream(session(source), ctl, ())).await;
        let data: String = body
            .lines()
            .filter(|l| l.starts_with("data: "))
            .collect::<Vec<_>>()
            .join("|");
        assert_eq!(data, "data: a|data: b|data: ");
        assert!(body.contains(": keep-alive"));
    }

    #[tokio::test]
    async fn test_dropping_body_releases_backend() {
        struct Tracked {
            inner: VecFragmentSource,
            released: Arc<AtomicBool>,
        }

        impl FragmentSource for Tracked {
            fn next(&mut self) -> NextFragment<'_> {
                self.inner.next()
            }
        }

        impl Drop for Tracked {
            fn drop(&mut self) {
                self.released.store(true, Ordering::SeqCst);
            }
        }

        let released = Arc::new(AtomicBool::new(false));
        let source = Tracked {
            inner: VecFragmentSource::from_texts(["a", "b", "c"], None),
            released: released.clone(),
        };

        let mut stream = Box::pin(event_stream(session(source), control(), ()));
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from("data: a\n\n"));
        assert!(!released.load(Ordering::SeqCst));

        drop(stream);
        assert!(released.load(Ordering::SeqCst));
    }
}
