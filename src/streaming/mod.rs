//! Chat request model, stream sessions and SSE framing.

mod body;
mod request;
mod session;
mod sse;

pub use body::{event_stream, StreamControl};
pub use request::ChatRequest;
pub use session::{SessionState, StreamSession};
pub use sse::{frame, keep_alive_comment, EventKind, SseEvent};
