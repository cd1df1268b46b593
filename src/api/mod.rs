//! HTTP and WebSocket surface.

pub mod routes;
pub mod types;

pub use types::{ApiServer, AppState};
