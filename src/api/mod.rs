//! HTTP adapter over the compliance core.

pub mod routes;

pub use routes::{create_router, AppState};
