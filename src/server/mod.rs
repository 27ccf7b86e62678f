//! HTTP surface: routes, handlers, shared state and the stream registry.

pub mod handlers;
mod registry;
mod router;
mod state;

pub use registry::{Reservation, SessionGuard, SessionRegistry};
pub use router::{bind, create_router, run_server};
pub use state::AppState;
