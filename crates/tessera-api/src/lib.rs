//! Tessera API crate - axum HTTP server and route handlers.
//!
//! Serves the user-facing action endpoints and the internal surface used by
//! the event bus, the sweep scheduler and the preview producer.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
