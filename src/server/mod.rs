//! HTTP server: listener loop, request dispatch, and shared state.

pub mod http;

pub use http::{run, AppState, RateLimiter};
