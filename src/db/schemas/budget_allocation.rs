//! Budget allocation document schema
//!
//! Output of the budget-planner pipeline: one plan per run, holding the
//! ordered per-idea allocation lines, the executive summary, and the
//! approval trail.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for budget allocations
pub const BUDGET_ALLOCATION_COLLECTION: &str = "budget_allocations";

/// Plan lifecycle status
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlanStatus {
    #[default]
    Draft,
    Approved,
    Rejected,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Draft => "Draft",
            PlanStatus::Approved => "Approved",
            PlanStatus::Rejected => "Rejected",
        }
    }
}

/// Coarse priority/ROI tier assigned by the delegate
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Tier {
    High,
    #[default]
    Medium,
    Low,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::High => "High",
            Tier::Medium => "Medium",
            Tier::Low => "Low",
        }
    }
}

/// One per-idea line in a plan
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AllocationLine {
    /// Referenced idea
    pub idea: ObjectId,

    /// Amount allocated to the idea, smallest currency unit
    pub allocated_budget: i64,

    /// Delegate-assigned score (0-100)
    pub priority_score: f64,

    pub priority: Tier,

    pub justification: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_timeline: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_roi: Option<Tier>,
}

/// Budget allocation document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct BudgetAllocationDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Budget the run was given, smallest currency unit
    pub total_budget: i64,

    /// Sum of the allocation lines; total minus reserve
    pub allocated_budget: i64,

    /// Withheld contingency (total minus allocated)
    pub contingency_reserve: i64,

    /// Lines ordered by descending priority score
    #[serde(default)]
    pub allocations: Vec<AllocationLine>,

    /// Executive summary text
    pub summary: String,

    #[serde(default)]
    pub recommendations: Vec<String>,

    #[serde(default)]
    pub status: PlanStatus,

    /// Admin who ran the analysis
    pub created_by: ObjectId,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<ObjectId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime>,

    /// Fiscal year label, e.g. "2026"
    pub fiscal_year: String,
}

impl IntoIndexes for BudgetAllocationDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Index on status for draft/approved listings
            (
                doc! { "status": 1 },
                Some(
                    IndexOptions::builder()
                        .name("status_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for BudgetAllocationDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
