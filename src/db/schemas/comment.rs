//! Comment document schema
//!
//! Top-level comments on concerns (separate from the embedded concern
//! discussion thread).

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for comments
pub const COMMENT_COLLECTION: &str = "comments";

/// Comment document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CommentDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Comment text (max 500 chars)
    pub text: String,

    /// Concern this comment belongs to
    pub concern: ObjectId,

    /// Comment author
    pub user: ObjectId,
}

impl IntoIndexes for CommentDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Index on concern for per-concern listings
            (
                doc! { "concern": 1 },
                Some(
                    IndexOptions::builder()
                        .name("concern_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for CommentDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
