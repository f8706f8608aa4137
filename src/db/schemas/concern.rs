//! Concern document schema
//!
//! Citizen-reported local issues with location, optional photo, upvote
//! set, and embedded discussion comments.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for concerns
pub const CONCERN_COLLECTION: &str = "concerns";

/// Valid concern categories ("Utlities" spelling is load-bearing: stored
/// documents and clients already use it)
pub const CONCERN_CATEGORIES: &[&str] = &[
    "Infrastructure",
    "Sanitation",
    "Public Safety",
    "Health",
    "Environment",
    "Transportation",
    "Utlities",
    "Other",
];

/// Concern resolution status
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConcernStatus {
    #[default]
    Pending,
    #[serde(rename = "In Progress")]
    InProgress,
    Resolved,
    Rejected,
}

impl ConcernStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcernStatus::Pending => "Pending",
            ConcernStatus::InProgress => "In Progress",
            ConcernStatus::Resolved => "Resolved",
            ConcernStatus::Rejected => "Rejected",
        }
    }
}

/// Geographic point attached to a concern
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Coordinates {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
}

/// Comment embedded in a concern
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ConcernComment {
    pub user: ObjectId,

    pub text: String,

    pub created_at: DateTime,

    /// Set when the author holds the admin role
    #[serde(default)]
    pub is_official: bool,
}

/// Concern document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ConcernDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Title (max 100 chars)
    pub title: String,

    /// Description (max 1000 chars)
    pub description: String,

    /// Category, one of CONCERN_CATEGORIES
    pub category: String,

    /// Free-text location
    pub location: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,

    #[serde(default)]
    pub status: ConcernStatus,

    /// Path of the uploaded photo under the uploads directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    /// Reporting user
    pub created_by: ObjectId,

    /// Users who upvoted; upvote is a toggle
    #[serde(default)]
    pub upvotes: Vec<ObjectId>,

    #[serde(default)]
    pub comments: Vec<ConcernComment>,
}

impl IntoIndexes for ConcernDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Compound index for filtered listings
            (
                doc! { "category": 1, "status": 1 },
                Some(
                    IndexOptions::builder()
                        .name("category_status_index".to_string())
                        .build(),
                ),
            ),
            // Index on reporter for "my concerns"
            (
                doc! { "created_by": 1 },
                Some(
                    IndexOptions::builder()
                        .name("created_by_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ConcernDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
