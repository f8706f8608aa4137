//! HTTP routes for CivicConnect
//!
//! One module per resource, each exposing a `handle` entry point that
//! dispatches on the path segments under its mount prefix. Shared
//! envelope and request plumbing lives in `respond`.

pub mod ai_routes;
pub mod auth_routes;
pub mod comments;
pub mod concerns;
pub mod health;
pub mod ideas;
pub mod notifications;
pub mod planner_routes;
pub mod policies;
pub mod respond;
pub mod users;

pub use health::{health_check, readiness_check, version_info};
pub use respond::{cors_preflight, error_response, BoxBody};
