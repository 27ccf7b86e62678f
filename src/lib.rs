//! Server-Sent Events gateway for chat answer streaming.
//!
//! Accepts a chat request over HTTP, pulls answer fragments from a generation
//! backend as they become available, and pushes each one to the client as an
//! SSE event until the answer completes, the backend fails, or the client
//! disconnects.

pub mod backend;
pub mod config;
pub mod error;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod streaming;

pub use config::Config;
pub use error::{ApiError, BackendError, GatewayError, Result};
