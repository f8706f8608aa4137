//! Idea document schema
//!
//! Citizen policy proposals: lifecycle status, voting sets with
//! denormalized counts, government response, and post-approval budget
//! stamp.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for ideas
pub const IDEA_COLLECTION: &str = "ideas";

/// Valid idea categories
pub const IDEA_CATEGORIES: &[&str] = &[
    "Revenue Generation",
    "Infrastructure Development",
    "Technology & Innovation",
    "Agriculture & Farming",
    "Education",
    "Healthcare",
    "Environment & Sustainability",
    "Transportation",
    "Tourism",
    "Public Safety",
    "Urban Planning",
    "Rural Development",
    "Employment & Skills",
    "Other",
];

/// Idea lifecycle status
///
/// The review chain runs Submitted -> Under Review -> Shortlisted ->
/// In Discussion -> Approved -> Funded -> Implemented; Rejected and
/// On Hold branch off from any non-terminal state.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IdeaStatus {
    #[default]
    Submitted,
    #[serde(rename = "Under Review")]
    UnderReview,
    Shortlisted,
    #[serde(rename = "In Discussion")]
    InDiscussion,
    Approved,
    Funded,
    Implemented,
    Rejected,
    #[serde(rename = "On Hold")]
    OnHold,
}

impl IdeaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdeaStatus::Submitted => "Submitted",
            IdeaStatus::UnderReview => "Under Review",
            IdeaStatus::Shortlisted => "Shortlisted",
            IdeaStatus::InDiscussion => "In Discussion",
            IdeaStatus::Approved => "Approved",
            IdeaStatus::Funded => "Funded",
            IdeaStatus::Implemented => "Implemented",
            IdeaStatus::Rejected => "Rejected",
            IdeaStatus::OnHold => "On Hold",
        }
    }

    /// Position along the review chain; None for the side branches
    fn chain_rank(&self) -> Option<u8> {
        match self {
            IdeaStatus::Submitted => Some(0),
            IdeaStatus::UnderReview => Some(1),
            IdeaStatus::Shortlisted => Some(2),
            IdeaStatus::InDiscussion => Some(3),
            IdeaStatus::Approved => Some(4),
            IdeaStatus::Funded => Some(5),
            IdeaStatus::Implemented => Some(6),
            IdeaStatus::Rejected | IdeaStatus::OnHold => None,
        }
    }

    /// Terminal states admit no further transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, IdeaStatus::Implemented | IdeaStatus::Rejected)
    }

    /// Whether a status edit from `self` to `to` is allowed.
    ///
    /// Forward movement along the review chain may skip states. Rejected
    /// and On Hold are reachable from any non-terminal state, and On Hold
    /// can reopen to any non-terminal state. Funded is never reachable
    /// through an edit: only approval of a budget plan moves an idea there.
    pub fn can_transition(self, to: IdeaStatus) -> bool {
        if self == to {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match to {
            IdeaStatus::Funded => false,
            IdeaStatus::Rejected | IdeaStatus::OnHold => true,
            IdeaStatus::Implemented => self.chain_rank().is_some(),
            _ => match (self.chain_rank(), to.chain_rank()) {
                (Some(from), Some(to_rank)) => to_rank > from,
                (None, Some(_)) => true,
                _ => false,
            },
        }
    }
}

/// Idea priority assigned during review
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IdeaPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Idea visibility
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// Scale of the expected impact
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImpactScope {
    #[default]
    Local,
    District,
    State,
    National,
}

impl ImpactScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactScope::Local => "Local",
            ImpactScope::District => "District",
            ImpactScope::State => "State",
            ImpactScope::National => "National",
        }
    }
}

/// Submitter's own budget estimate
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct EstimatedBudget {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,

    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_currency() -> String {
    "INR".to_string()
}

/// Proposed implementation timeline
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct IdeaTimeline {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Official response recorded by an administrator
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GovernmentResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    pub message: String,

    pub responded_by: ObjectId,

    pub responded_at: DateTime,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_implementation_date: Option<DateTime>,
}

/// Budget stamped onto an idea when its allocation plan is approved
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BudgetStamp {
    pub allocated_budget: i64,

    pub allocation_plan: ObjectId,

    pub allocated_at: DateTime,

    pub allocated_by: ObjectId,

    pub priority_score: f64,

    pub justification: String,
}

/// One dated entry in the implementation log
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ImplementationUpdate {
    pub message: String,
    pub updated_by: ObjectId,
    pub updated_at: DateTime,
}

/// Implementation tracking for funded ideas
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Implementation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_date: Option<DateTime>,

    /// Progress percentage (0-100)
    #[serde(default)]
    pub progress: i32,

    #[serde(default)]
    pub updates: Vec<ImplementationUpdate>,
}

/// Idea document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct IdeaDoc {
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

    /// Category, one of IDEA_CATEGORIES
    pub category: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,

    /// Target area or location
    pub target_area: String,

    /// Expected impact scale
    #[serde(default)]
    pub expected_impact: ImpactScope,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_budget: Option<EstimatedBudget>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline: Option<IdeaTimeline>,

    #[serde(default)]
    pub benefits: Vec<String>,

    #[serde(default)]
    pub challenges: Vec<String>,

    #[serde(default)]
    pub resources: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Submitting user
    pub submitted_by: ObjectId,

    #[serde(default)]
    pub status: IdeaStatus,

    #[serde(default)]
    pub priority: IdeaPriority,

    #[serde(default)]
    pub visibility: Visibility,

    /// Users who upvoted; disjoint from downvotes
    #[serde(default)]
    pub upvotes: Vec<ObjectId>,

    /// Denormalized size of upvotes
    #[serde(default)]
    pub upvote_count: i32,

    /// Users who downvoted; disjoint from upvotes
    #[serde(default)]
    pub downvotes: Vec<ObjectId>,

    /// Denormalized size of downvotes
    #[serde(default)]
    pub downvote_count: i32,

    #[serde(default)]
    pub view_count: i32,

    #[serde(default)]
    pub share_count: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub government_response: Option<GovernmentResponse>,

    /// Present once a containing budget plan has been approved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_allocation: Option<BudgetStamp>,

    #[serde(default)]
    pub implementation: Implementation,

    #[serde(default)]
    pub is_featured: bool,
}

impl IntoIndexes for IdeaDoc {
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
            // Index on submitter for "my ideas"
            (
                doc! { "submitted_by": 1 },
                Some(
                    IndexOptions::builder()
                        .name("submitted_by_index".to_string())
                        .build(),
                ),
            ),
            // Index on upvote count for popularity sorting
            (
                doc! { "upvote_count": -1 },
                Some(
                    IndexOptions::builder()
                        .name("upvote_count_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for IdeaDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_skips_allowed() {
        assert!(IdeaStatus::Submitted.can_transition(IdeaStatus::Approved));
        assert!(IdeaStatus::Submitted.can_transition(IdeaStatus::UnderReview));
        assert!(IdeaStatus::Shortlisted.can_transition(IdeaStatus::InDiscussion));
    }

    #[test]
    fn backward_moves_rejected() {
        assert!(!IdeaStatus::Approved.can_transition(IdeaStatus::Submitted));
        assert!(!IdeaStatus::Funded.can_transition(IdeaStatus::UnderReview));
    }

    #[test]
    fn funded_only_through_plan_approval() {
        assert!(!IdeaStatus::Approved.can_transition(IdeaStatus::Funded));
        assert!(!IdeaStatus::Submitted.can_transition(IdeaStatus::Funded));
    }

    #[test]
    fn terminal_states_stuck() {
        assert!(!IdeaStatus::Implemented.can_transition(IdeaStatus::OnHold));
        assert!(!IdeaStatus::Implemented.can_transition(IdeaStatus::Submitted));
        assert!(!IdeaStatus::Rejected.can_transition(IdeaStatus::OnHold));
        assert!(!IdeaStatus::Rejected.can_transition(IdeaStatus::UnderReview));
    }

    #[test]
    fn on_hold_reopens_to_non_terminal() {
        assert!(IdeaStatus::OnHold.can_transition(IdeaStatus::UnderReview));
        assert!(IdeaStatus::OnHold.can_transition(IdeaStatus::Approved));
        assert!(!IdeaStatus::OnHold.can_transition(IdeaStatus::Implemented));
        assert!(!IdeaStatus::OnHold.can_transition(IdeaStatus::Funded));
    }

    #[test]
    fn side_branches_reachable_from_chain() {
        assert!(IdeaStatus::Submitted.can_transition(IdeaStatus::Rejected));
        assert!(IdeaStatus::Approved.can_transition(IdeaStatus::OnHold));
        assert!(IdeaStatus::OnHold.can_transition(IdeaStatus::Rejected));
    }

    #[test]
    fn same_state_is_noop() {
        assert!(IdeaStatus::UnderReview.can_transition(IdeaStatus::UnderReview));
        assert!(IdeaStatus::Implemented.can_transition(IdeaStatus::Implemented));
    }

    #[test]
    fn status_strings_match_stored_values() {
        let json = serde_json::to_string(&IdeaStatus::UnderReview).unwrap();
        assert_eq!(json, "\"Under Review\"");
        let parsed: IdeaStatus = serde_json::from_str("\"On Hold\"").unwrap();
        assert_eq!(parsed, IdeaStatus::OnHold);
        assert_eq!(IdeaStatus::InDiscussion.as_str(), "In Discussion");
    }
}
