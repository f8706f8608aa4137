//! Notification document schema
//!
//! Per-user notifications fanned out by domain events (status changes,
//! comments, budget approvals, admin broadcasts).

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for notifications
pub const NOTIFICATION_COLLECTION: &str = "notifications";

/// Notification category
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NotificationType {
    StatusUpdate,
    NewComment,
    AdminAlert,
    #[default]
    System,
    IdeaResponse,
    IdeaUpdate,
    IdeaSubmitted,
    PolicyUpdate,
    ConcernUpdate,
    Achievement,
}

/// Notification document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct NotificationDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Receiving user
    pub recipient: ObjectId,

    /// Originating user (the acting admin for broadcasts)
    pub sender: ObjectId,

    #[serde(rename = "type")]
    pub notification_type: NotificationType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub concern: Option<ObjectId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<ObjectId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub idea: Option<ObjectId>,

    pub message: String,

    #[serde(default)]
    pub is_read: bool,
}

impl NotificationDoc {
    /// Create an unread notification
    pub fn new(
        recipient: ObjectId,
        sender: ObjectId,
        notification_type: NotificationType,
        message: String,
    ) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            recipient,
            sender,
            notification_type,
            concern: None,
            policy: None,
            idea: None,
            message,
            is_read: false,
        }
    }

    pub fn about_concern(mut self, concern: ObjectId) -> Self {
        self.concern = Some(concern);
        self
    }

    pub fn about_policy(mut self, policy: ObjectId) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn about_idea(mut self, idea: ObjectId) -> Self {
        self.idea = Some(idea);
        self
    }
}

impl IntoIndexes for NotificationDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Index on recipient for inbox queries
            (
                doc! { "recipient": 1 },
                Some(
                    IndexOptions::builder()
                        .name("recipient_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for NotificationDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
