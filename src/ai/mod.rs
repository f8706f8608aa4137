//! Generative-language delegate
//!
//! One-shot prompt/reply calls to an external model, plus the JSON
//! extraction boundary every reply passes through.

pub mod client;
pub mod extract;

pub use client::{GeminiClient, LanguageModel};
pub use extract::parse_embedded;
