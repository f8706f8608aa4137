//! Plan approval fan-out
//!
//! Approving a plan stamps every referenced idea with its allocation,
//! moves it to Funded, and notifies the submitter, then broadcasts to
//! all active citizens. Each line is its own unit of work: a failure
//! funding one idea is logged and reported as skipped, never aborting
//! the rest of the plan.

use bson::{doc, oid::ObjectId, DateTime};
use tracing::warn;

use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{
    BudgetAllocationDoc, BudgetStamp, IdeaDoc, IdeaStatus, NotificationDoc, NotificationType,
    Role, IDEA_COLLECTION,
};
use crate::planner::prompts::lakh;
use crate::services::notify;
use crate::types::AppError;

/// Result of funding the lines of an approved plan
#[derive(Debug, Default)]
pub struct FanOutReport {
    pub funded: usize,
    pub skipped: Vec<ObjectId>,
}

/// Stamp and fund every idea referenced by an approved plan
pub async fn fund_allocated_ideas(
    mongo: &MongoClient,
    plan: &BudgetAllocationDoc,
    approved_by: ObjectId,
) -> Result<FanOutReport, AppError> {
    let plan_id = plan
        ._id
        .ok_or_else(|| AppError::Internal("Plan has no id".to_string()))?;
    let ideas = mongo.collection::<IdeaDoc>(IDEA_COLLECTION).await?;

    let mut report = FanOutReport::default();
    for line in &plan.allocations {
        let stamp = BudgetStamp {
            allocated_budget: line.allocated_budget,
            allocation_plan: plan_id,
            allocated_at: DateTime::now(),
            allocated_by: approved_by,
            priority_score: line.priority_score,
            justification: line.justification.clone(),
        };

        match fund_one(&ideas, line.idea, stamp).await {
            Ok(Some(idea)) => {
                report.funded += 1;
                notify::deliver(
                    mongo,
                    NotificationDoc::new(
                        idea.submitted_by,
                        approved_by,
                        NotificationType::Achievement,
                        achievement_message(&idea.title, line.allocated_budget),
                    )
                    .about_idea(line.idea),
                )
                .await;
            }
            Ok(None) => {
                warn!(idea = %line.idea, "allocated idea not found, skipping");
                report.skipped.push(line.idea);
            }
            Err(err) => {
                warn!(idea = %line.idea, error = %err, "failed to fund idea, skipping");
                report.skipped.push(line.idea);
            }
        }
    }

    let broadcast = broadcast_message(plan.allocations.len());
    notify::broadcast_to_role(mongo, Role::Citizen, |recipient| {
        NotificationDoc::new(
            recipient,
            approved_by,
            NotificationType::AdminAlert,
            broadcast.clone(),
        )
    })
    .await;

    Ok(report)
}

async fn fund_one(
    ideas: &MongoCollection<IdeaDoc>,
    idea_id: ObjectId,
    stamp: BudgetStamp,
) -> Result<Option<IdeaDoc>, AppError> {
    let stamp_bson = bson::to_bson(&stamp)
        .map_err(|e| AppError::Internal(format!("Failed to encode budget stamp: {}", e)))?;

    ideas
        .find_one_and_update(
            doc! { "_id": idea_id },
            doc! {
                "$set": {
                    "budget_allocation": stamp_bson,
                    "status": IdeaStatus::Funded.as_str(),
                    "metadata.updated_at": DateTime::now(),
                }
            },
        )
        .await
}

fn achievement_message(title: &str, allocated_budget: i64) -> String {
    format!(
        "Your idea \"{}\" has been allocated Rs {} Lakh in budget!",
        title,
        lakh(allocated_budget)
    )
}

fn broadcast_message(funded_lines: usize) -> String {
    format!(
        "Government has approved budget allocation for {} innovative ideas! Check the Innovation Hub.",
        funded_lines
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn achievement_message_shows_lakh() {
        let message = achievement_message("Smart Streetlights", 9_000_000);
        assert_eq!(
            message,
            "Your idea \"Smart Streetlights\" has been allocated Rs 90.00 Lakh in budget!"
        );
    }

    #[test]
    fn broadcast_message_counts_lines() {
        assert!(broadcast_message(7).contains("7 innovative ideas"));
    }
}
