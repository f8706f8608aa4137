//! CivicConnect - citizen engagement backend
//!
//! Citizens raise Concerns and submit Ideas; administrators publish
//! Policies and run participatory budgeting over approved ideas. A
//! language-model delegate powers policy summaries, Q&A chat, and the
//! budget-planner pipeline.
//!
//! ## Services
//!
//! - **Auth**: JWT access tokens with rotating refresh-token cookies
//! - **Ideas / Concerns / Policies**: the citizen-facing resources
//! - **AI**: per-policy summaries, contextual chat, and civic suggestions
//! - **Budget planner**: scores approved ideas and drafts a fiscal-year
//!   allocation plan, exportable as a PDF report
//! - **Uploads**: multipart concern images and policy PDFs, static-served

pub mod ai;
pub mod auth;
pub mod config;
pub mod db;
pub mod planner;
pub mod routes;
pub mod server;
pub mod services;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{AppError, Result};
