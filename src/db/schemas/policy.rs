//! Policy document schema
//!
//! Government policies published to citizens, with optional uploaded PDF
//! (plus its extracted text) and a cached AI summary.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for policies
pub const POLICY_COLLECTION: &str = "policies";

/// Valid policy categories
pub const POLICY_CATEGORIES: &[&str] = &[
    "Health",
    "Education",
    "Infrastructure",
    "Environment",
    "Economy",
    "Transportation",
    "Public Safety",
    "Housing",
    "Technology",
    "Other",
];

/// Policy publication status
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PolicyStatus {
    #[default]
    Draft,
    #[serde(rename = "Under Review")]
    UnderReview,
    Published,
    Archived,
}

impl PolicyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyStatus::Draft => "Draft",
            PolicyStatus::UnderReview => "Under Review",
            PolicyStatus::Published => "Published",
            PolicyStatus::Archived => "Archived",
        }
    }
}

/// Policy document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PolicyDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Title (10-200 chars)
    pub title: String,

    /// Description (at least 50 chars)
    pub description: String,

    /// Category, one of POLICY_CATEGORIES
    pub category: String,

    #[serde(default)]
    pub status: PolicyStatus,

    /// External document link
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,

    /// Path of the uploaded PDF under the uploads directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_file_path: Option<String>,

    /// Text extracted from the uploaded PDF
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_content: Option<String>,

    /// Cached AI-generated summary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<DateTime>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Creating administrator
    pub created_by: ObjectId,

    #[serde(default)]
    pub view_count: i32,

    #[serde(default)]
    pub comments_count: i32,

    /// Denormalized size of supporters
    #[serde(default)]
    pub support_count: i32,

    /// Users who registered support; support is one-way
    #[serde(default)]
    pub supporters: Vec<ObjectId>,
}

impl IntoIndexes for PolicyDoc {
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
        ]
    }
}

impl MutMetadata for PolicyDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
