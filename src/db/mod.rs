//! MongoDB persistence layer
//!
//! Typed collection wrapper plus per-collection document schemas.

pub mod mongo;
pub mod schemas;

pub use mongo::{IntoIndexes, MongoClient, MongoCollection, MutMetadata};
