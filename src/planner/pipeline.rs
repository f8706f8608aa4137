//! Budget-planner pipeline
//!
//! Runs the allocation flow: shrink ideas, sufficiency gate, batched
//! scoring through the language-model delegate, merge and rank, cap
//! fitting, executive summary. Pure with respect to storage: the caller
//! persists the draft only when the run returns a plan, so a failed run
//! can never leave partial allocations behind.
//!
//! Error policy is asymmetric on purpose. Sufficiency and summary are
//! advisory and default to fail-open; per-idea scoring is load-bearing
//! and defaults to fail-closed. Each of the three is configurable. A
//! delegate transport failure aborts the run regardless of the flags;
//! the flags only govern replies that arrive but cannot be parsed.

use std::cmp::Ordering;

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ai::{parse_embedded, LanguageModel};
use crate::db::schemas::{AllocationLine, IdeaDoc, Tier};
use crate::planner::prompts::{self, CompactIdea};
use crate::types::AppError;

/// Ideas per scoring request
pub const BATCH_SIZE: usize = 8;

/// Share of the budget open for allocation; the rest is held in reserve
pub const ALLOCATION_CAP_RATIO: f64 = 0.9;

/// Per-stage handling of delegate replies that cannot be parsed
#[derive(Debug, Clone, Copy)]
pub struct PlannerSettings {
    /// Treat an unparseable sufficiency verdict as "sufficient"
    pub sufficiency_fail_open: bool,

    /// Skip a scoring batch with an unparseable reply instead of
    /// aborting the whole run
    pub scoring_fail_open: bool,

    /// Build the summary locally when the reply is unparseable
    pub summary_fail_open: bool,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            sufficiency_fail_open: true,
            scoring_fail_open: false,
            summary_fail_open: true,
        }
    }
}

/// Verdict of the sufficiency probe
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SufficiencyVerdict {
    is_sufficient: bool,

    #[serde(default)]
    estimated_minimum_budget: f64,

    #[serde(default)]
    message: String,
}

/// Reply shape of one scoring batch
#[derive(Debug, Deserialize)]
struct BatchReply {
    allocations: Vec<RawAllocation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAllocation {
    idea_id: String,

    allocated_budget: f64,

    priority_score: f64,

    priority: Tier,

    justification: String,

    #[serde(default)]
    estimated_timeline: Option<String>,

    #[serde(default, rename = "expectedROI")]
    expected_roi: Option<Tier>,
}

/// Reply shape of the summary request
#[derive(Debug, Deserialize)]
struct SummaryReply {
    summary: String,

    #[serde(default)]
    recommendations: Vec<String>,
}

/// Shortfall report returned when the budget cannot cover the slate
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsufficiencyReport {
    pub provided_budget: i64,
    pub estimated_minimum_budget: i64,
    pub shortfall: i64,
    pub ideas_count: usize,
    pub message: String,
    pub recommendation: String,
}

/// Completed allocation run, not yet persisted
#[derive(Debug, Clone)]
pub struct PlanDraft {
    pub total_budget: i64,
    pub allocated_budget: i64,
    pub contingency_reserve: i64,
    pub allocations: Vec<AllocationLine>,
    pub summary: String,
    pub recommendations: Vec<String>,
    pub analyzed_count: usize,
}

/// Result of a planner run
#[derive(Debug, Clone)]
pub enum PlannerOutcome {
    Insufficient(InsufficiencyReport),
    Plan(PlanDraft),
}

/// One allocation run against the language-model delegate
pub struct BudgetPlanner<'a> {
    delegate: &'a dyn LanguageModel,
    settings: PlannerSettings,
}

impl<'a> BudgetPlanner<'a> {
    pub fn new(delegate: &'a dyn LanguageModel, settings: PlannerSettings) -> Self {
        Self { delegate, settings }
    }

    /// Run the full pipeline over the Approved idea set.
    ///
    /// Returns an insufficiency report when the probe rejects the
    /// budget, otherwise a ranked, cap-fitted plan ready to persist.
    pub async fn run(
        &self,
        total_budget: i64,
        ideas: &[IdeaDoc],
    ) -> Result<PlannerOutcome, AppError> {
        let compact: Vec<CompactIdea> = ideas.iter().filter_map(shrink).collect();
        if compact.is_empty() {
            return Err(AppError::Validation(
                "No approved ideas found for budget allocation".to_string(),
            ));
        }

        let verdict = self.check_sufficiency(total_budget, &compact).await?;
        if !verdict.is_sufficient {
            let estimated = verdict.estimated_minimum_budget.round() as i64;
            return Ok(PlannerOutcome::Insufficient(InsufficiencyReport {
                provided_budget: total_budget,
                estimated_minimum_budget: estimated,
                shortfall: estimated - total_budget,
                ideas_count: compact.len(),
                message: verdict.message,
                recommendation: format!(
                    "Please increase the budget to at least Rs {} Crore to implement \
                     these {} approved ideas effectively.",
                    prompts::crore(estimated),
                    compact.len()
                ),
            }));
        }

        let mut allocations: Vec<AllocationLine> = Vec::new();
        for (index, batch) in compact.chunks(BATCH_SIZE).enumerate() {
            let mut scored = self.score_batch(batch, total_budget, index + 1).await?;
            allocations.append(&mut scored);
        }
        if allocations.is_empty() {
            return Err(AppError::Delegate(
                "Scoring produced no allocations".to_string(),
            ));
        }

        allocations.sort_by(|a, b| {
            b.priority_score
                .partial_cmp(&a.priority_score)
                .unwrap_or(Ordering::Equal)
        });

        let (allocated_budget, contingency_reserve) =
            fit_to_cap(&mut allocations, total_budget);

        let (summary, recommendations) = self
            .summarize(&allocations, total_budget, allocated_budget)
            .await?;

        debug!(
            ideas = compact.len(),
            lines = allocations.len(),
            allocated_budget,
            "allocation run complete"
        );

        Ok(PlannerOutcome::Plan(PlanDraft {
            total_budget,
            allocated_budget,
            contingency_reserve,
            allocations,
            summary,
            recommendations,
            analyzed_count: compact.len(),
        }))
    }

    async fn check_sufficiency(
        &self,
        total_budget: i64,
        ideas: &[CompactIdea],
    ) -> Result<SufficiencyVerdict, AppError> {
        let prompt = prompts::sufficiency_prompt(total_budget, ideas);
        let reply = self.delegate.prompt(&prompt).await?;
        match parse_embedded::<SufficiencyVerdict>(&reply) {
            Ok(verdict) => Ok(verdict),
            Err(err) if self.settings.sufficiency_fail_open => {
                warn!(error = %err, "sufficiency reply unusable, assuming sufficient");
                Ok(SufficiencyVerdict {
                    is_sufficient: true,
                    estimated_minimum_budget: total_budget as f64,
                    message: "Unable to assess budget sufficiency".to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn score_batch(
        &self,
        batch: &[CompactIdea],
        total_budget: i64,
        batch_number: usize,
    ) -> Result<Vec<AllocationLine>, AppError> {
        let prompt = prompts::batch_prompt(batch, total_budget, batch_number);
        let reply = self.delegate.prompt(&prompt).await?;
        let parsed = parse_embedded::<BatchReply>(&reply).and_then(to_lines);
        match parsed {
            Ok(lines) => Ok(lines),
            Err(err) if self.settings.scoring_fail_open => {
                warn!(batch = batch_number, error = %err, "skipping unusable scoring batch");
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    async fn summarize(
        &self,
        allocations: &[AllocationLine],
        total_budget: i64,
        allocated_budget: i64,
    ) -> Result<(String, Vec<String>), AppError> {
        let prompt = prompts::summary_prompt(allocations, total_budget, allocated_budget);
        let reply = self.delegate.prompt(&prompt).await?;
        match parse_embedded::<SummaryReply>(&reply) {
            Ok(parsed) => Ok((parsed.summary, parsed.recommendations)),
            Err(err) if self.settings.summary_fail_open => {
                warn!(error = %err, "summary reply unusable, using local fallback");
                Ok(fallback_summary(allocations.len(), allocated_budget))
            }
            Err(err) => Err(err),
        }
    }
}

/// Cap the allocation total at 90% of the budget.
///
/// When the delegate over-allocates, every line is rescaled by the
/// ratio cap/sum and rounded; the returned allocated total is the cap
/// itself, so per-line rounding drift is absorbed into the reserve.
/// Returns the allocated total and the contingency reserve.
pub fn fit_to_cap(lines: &mut [AllocationLine], total_budget: i64) -> (i64, i64) {
    let cap = (total_budget as f64 * ALLOCATION_CAP_RATIO).round() as i64;
    let sum: i64 = lines.iter().map(|l| l.allocated_budget).sum();
    if sum > cap {
        let scale = cap as f64 / sum as f64;
        for line in lines.iter_mut() {
            line.allocated_budget = (line.allocated_budget as f64 * scale).round() as i64;
        }
        (cap, total_budget - cap)
    } else {
        (sum, total_budget - sum)
    }
}

/// Deterministic summary used when the delegate reply is unusable
pub fn fallback_summary(analyzed: usize, allocated_budget: i64) -> (String, Vec<String>) {
    (
        format!(
            "Analyzed {} approved ideas with total allocation of Rs {} Crore.",
            analyzed,
            prompts::crore(allocated_budget)
        ),
        vec![
            "Prioritize high-impact projects first".to_string(),
            "Monitor implementation progress closely".to_string(),
            "Reserve contingency funds for unexpected costs".to_string(),
        ],
    )
}

fn to_lines(reply: BatchReply) -> Result<Vec<AllocationLine>, AppError> {
    reply
        .allocations
        .into_iter()
        .map(|raw| {
            let idea = ObjectId::parse_str(&raw.idea_id).map_err(|_| {
                AppError::Delegate(format!(
                    "Scoring reply referenced invalid idea id {}",
                    raw.idea_id
                ))
            })?;
            Ok(AllocationLine {
                idea,
                allocated_budget: raw.allocated_budget.round() as i64,
                priority_score: raw.priority_score,
                priority: raw.priority,
                justification: raw.justification,
                estimated_timeline: raw.estimated_timeline,
                expected_roi: raw.expected_roi,
            })
        })
        .collect()
}

/// Project an idea down to the fields the delegate needs
fn shrink(idea: &IdeaDoc) -> Option<CompactIdea> {
    let id = idea._id?;
    Some(CompactIdea {
        id: id.to_hex(),
        title: idea.title.clone(),
        description: clip_with_ellipsis(&idea.description, 300),
        category: idea.category.clone(),
        sub_category: idea.sub_category.clone(),
        impact: idea.expected_impact.as_str().to_string(),
        timeline: idea
            .timeline
            .as_ref()
            .and_then(|t| t.proposed.clone().or_else(|| t.description.clone())),
        benefits: idea
            .benefits
            .iter()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join("; "),
        target_area: idea.target_area.clone(),
    })
}

fn clip_with_ellipsis(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let mut clipped: String = text.chars().take(max).collect();
        clipped.push_str("...");
        clipped
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::IdeaStatus;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, AppError>>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<String, AppError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
            }
        }

        fn remaining(&self) -> usize {
            self.replies.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn prompt(&self, _prompt: &str) -> Result<String, AppError> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AppError::Delegate("script exhausted".to_string())))
        }
    }

    fn idea(title: &str) -> IdeaDoc {
        IdeaDoc {
            _id: Some(ObjectId::new()),
            title: title.to_string(),
            description: "A sufficiently descriptive proposal for the scorer".to_string(),
            category: "Education".to_string(),
            target_area: "Ward 7".to_string(),
            submitted_by: ObjectId::new(),
            status: IdeaStatus::Approved,
            ..Default::default()
        }
    }

    fn sufficient_reply() -> Result<String, AppError> {
        Ok(r#"{"isSufficient": true, "estimatedMinimumBudget": 0, "message": "ok"}"#.to_string())
    }

    fn batch_reply(ideas: &[IdeaDoc], amount: i64, score: f64) -> Result<String, AppError> {
        let lines: Vec<String> = ideas
            .iter()
            .map(|i| {
                format!(
                    r#"{{"ideaId": "{}", "allocatedBudget": {}, "priorityScore": {}, "priority": "High", "justification": "strong case", "estimatedTimeline": "6 months", "expectedROI": "High"}}"#,
                    i._id.unwrap().to_hex(),
                    amount,
                    score
                )
            })
            .collect();
        Ok(format!(r#"{{"allocations": [{}]}}"#, lines.join(",")))
    }

    fn summary_reply() -> Result<String, AppError> {
        Ok(r#"{"summary": "Allocated across the slate.", "recommendations": ["a", "b", "c"]}"#
            .to_string())
    }

    #[tokio::test]
    async fn over_allocation_rescales_to_cap() {
        let ideas: Vec<IdeaDoc> = (0..10).map(|i| idea(&format!("Idea {i}"))).collect();
        let model = ScriptedModel::new(vec![
            sufficient_reply(),
            batch_reply(&ideas[..8], 15_000_000, 80.0),
            batch_reply(&ideas[8..], 15_000_000, 60.0),
            summary_reply(),
        ]);
        let planner = BudgetPlanner::new(&model, PlannerSettings::default());

        let outcome = planner.run(100_000_000, &ideas).await.unwrap();
        let plan = match outcome {
            PlannerOutcome::Plan(plan) => plan,
            other => panic!("expected a plan, got {other:?}"),
        };

        assert_eq!(plan.total_budget, 100_000_000);
        assert_eq!(plan.allocated_budget, 90_000_000);
        assert_eq!(plan.contingency_reserve, 10_000_000);
        assert_eq!(plan.allocations.len(), 10);
        for line in &plan.allocations {
            assert_eq!(line.allocated_budget, 9_000_000);
        }
        assert_eq!(plan.analyzed_count, 10);
    }

    #[tokio::test]
    async fn merged_lines_sorted_by_score_descending() {
        let ideas: Vec<IdeaDoc> = (0..10).map(|i| idea(&format!("Idea {i}"))).collect();
        let model = ScriptedModel::new(vec![
            sufficient_reply(),
            batch_reply(&ideas[..8], 1_000_000, 40.0),
            batch_reply(&ideas[8..], 1_000_000, 95.0),
            summary_reply(),
        ]);
        let planner = BudgetPlanner::new(&model, PlannerSettings::default());

        let outcome = planner.run(100_000_000, &ideas).await.unwrap();
        let plan = match outcome {
            PlannerOutcome::Plan(plan) => plan,
            other => panic!("expected a plan, got {other:?}"),
        };

        assert_eq!(plan.allocations[0].priority_score, 95.0);
        assert!(plan
            .allocations
            .windows(2)
            .all(|pair| pair[0].priority_score >= pair[1].priority_score));
    }

    #[tokio::test]
    async fn under_cap_sums_without_rescale() {
        let ideas: Vec<IdeaDoc> = (0..2).map(|i| idea(&format!("Idea {i}"))).collect();
        let model = ScriptedModel::new(vec![
            sufficient_reply(),
            batch_reply(&ideas, 10_000_000, 70.0),
            summary_reply(),
        ]);
        let planner = BudgetPlanner::new(&model, PlannerSettings::default());

        let outcome = planner.run(100_000_000, &ideas).await.unwrap();
        let plan = match outcome {
            PlannerOutcome::Plan(plan) => plan,
            other => panic!("expected a plan, got {other:?}"),
        };

        assert_eq!(plan.allocated_budget, 20_000_000);
        assert_eq!(plan.contingency_reserve, 80_000_000);
        for line in &plan.allocations {
            assert_eq!(line.allocated_budget, 10_000_000);
        }
    }

    #[tokio::test]
    async fn insufficient_budget_aborts_with_shortfall() {
        let ideas: Vec<IdeaDoc> = (0..3).map(|i| idea(&format!("Idea {i}"))).collect();
        let model = ScriptedModel::new(vec![Ok(
            r#"{"isSufficient": false, "estimatedMinimumBudget": 50000000, "message": "Far below viable cost"}"#
                .to_string(),
        )]);
        let planner = BudgetPlanner::new(&model, PlannerSettings::default());

        let outcome = planner.run(20_000_000, &ideas).await.unwrap();
        let report = match outcome {
            PlannerOutcome::Insufficient(report) => report,
            other => panic!("expected insufficiency, got {other:?}"),
        };

        assert_eq!(report.provided_budget, 20_000_000);
        assert_eq!(report.estimated_minimum_budget, 50_000_000);
        assert_eq!(report.shortfall, 30_000_000);
        assert_eq!(report.ideas_count, 3);
        assert!(report.recommendation.contains("Rs 5.00 Crore"));
        // No scoring or summary calls were made
        assert_eq!(model.remaining(), 0);
    }

    #[tokio::test]
    async fn malformed_scoring_reply_fails_the_run() {
        let ideas: Vec<IdeaDoc> = (0..10).map(|i| idea(&format!("Idea {i}"))).collect();
        let model = ScriptedModel::new(vec![
            sufficient_reply(),
            batch_reply(&ideas[..8], 5_000_000, 70.0),
            Ok("the model rambles with no object".to_string()),
        ]);
        let planner = BudgetPlanner::new(&model, PlannerSettings::default());

        let err = planner.run(100_000_000, &ideas).await.unwrap_err();
        assert!(matches!(err, AppError::Delegate(_)));
    }

    #[tokio::test]
    async fn scoring_fail_open_skips_bad_batch() {
        let ideas: Vec<IdeaDoc> = (0..10).map(|i| idea(&format!("Idea {i}"))).collect();
        let model = ScriptedModel::new(vec![
            sufficient_reply(),
            Ok("unusable".to_string()),
            batch_reply(&ideas[8..], 5_000_000, 70.0),
            summary_reply(),
        ]);
        let settings = PlannerSettings {
            scoring_fail_open: true,
            ..PlannerSettings::default()
        };
        let planner = BudgetPlanner::new(&model, settings);

        let outcome = planner.run(100_000_000, &ideas).await.unwrap();
        let plan = match outcome {
            PlannerOutcome::Plan(plan) => plan,
            other => panic!("expected a plan, got {other:?}"),
        };
        assert_eq!(plan.allocations.len(), 2);
    }

    #[tokio::test]
    async fn unusable_sufficiency_reply_fails_open_by_default() {
        let ideas: Vec<IdeaDoc> = (0..2).map(|i| idea(&format!("Idea {i}"))).collect();
        let model = ScriptedModel::new(vec![
            Ok("no object here".to_string()),
            batch_reply(&ideas, 2_000_000, 55.0),
            summary_reply(),
        ]);
        let planner = BudgetPlanner::new(&model, PlannerSettings::default());

        let outcome = planner.run(100_000_000, &ideas).await.unwrap();
        assert!(matches!(outcome, PlannerOutcome::Plan(_)));
    }

    #[tokio::test]
    async fn sufficiency_fail_closed_when_configured() {
        let ideas: Vec<IdeaDoc> = (0..2).map(|i| idea(&format!("Idea {i}"))).collect();
        let model = ScriptedModel::new(vec![Ok("no object here".to_string())]);
        let settings = PlannerSettings {
            sufficiency_fail_open: false,
            ..PlannerSettings::default()
        };
        let planner = BudgetPlanner::new(&model, settings);

        let err = planner.run(100_000_000, &ideas).await.unwrap_err();
        assert!(matches!(err, AppError::Delegate(_)));
    }

    #[tokio::test]
    async fn unusable_summary_reply_falls_back_locally() {
        let ideas: Vec<IdeaDoc> = (0..2).map(|i| idea(&format!("Idea {i}"))).collect();
        let model = ScriptedModel::new(vec![
            sufficient_reply(),
            batch_reply(&ideas, 5_000_000, 70.0),
            Ok("nothing parseable".to_string()),
        ]);
        let planner = BudgetPlanner::new(&model, PlannerSettings::default());

        let outcome = planner.run(100_000_000, &ideas).await.unwrap();
        let plan = match outcome {
            PlannerOutcome::Plan(plan) => plan,
            other => panic!("expected a plan, got {other:?}"),
        };

        assert_eq!(
            plan.summary,
            "Analyzed 2 approved ideas with total allocation of Rs 1.00 Crore."
        );
        assert_eq!(plan.recommendations.len(), 3);
    }

    #[tokio::test]
    async fn empty_idea_set_is_a_validation_error() {
        let model = ScriptedModel::new(vec![]);
        let planner = BudgetPlanner::new(&model, PlannerSettings::default());

        let err = planner.run(1_000_000, &[]).await.unwrap_err();
        match err {
            AppError::Validation(message) => {
                assert_eq!(message, "No approved ideas found for budget allocation")
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn rescaled_lines_follow_round_ratio() {
        let line = |amount: i64| AllocationLine {
            idea: ObjectId::new(),
            allocated_budget: amount,
            priority_score: 50.0,
            priority: Tier::Medium,
            justification: "test".to_string(),
            estimated_timeline: None,
            expected_roi: None,
        };
        // sum 108M against a 90M cap
        let mut lines = vec![line(40_000_000), line(35_000_000), line(33_000_000)];

        let (allocated, reserve) = fit_to_cap(&mut lines, 100_000_000);

        assert_eq!(allocated, 90_000_000);
        assert_eq!(reserve, 10_000_000);
        let expected =
            |pre: i64| (pre as f64 * 90_000_000.0 / 108_000_000.0).round() as i64;
        assert_eq!(lines[0].allocated_budget, expected(40_000_000));
        assert_eq!(lines[1].allocated_budget, expected(35_000_000));
        assert_eq!(lines[2].allocated_budget, expected(33_000_000));
        let sum: i64 = lines.iter().map(|l| l.allocated_budget).sum();
        assert!((sum - allocated).abs() <= lines.len() as i64);
    }

    #[test]
    fn shrink_truncates_description_and_benefits() {
        let mut long = idea("Big");
        long.description = "d".repeat(400);
        long.benefits = vec![
            "one".to_string(),
            "two".to_string(),
            "three".to_string(),
            "four".to_string(),
        ];

        let compact = shrink(&long).unwrap();
        assert_eq!(compact.description.chars().count(), 303);
        assert!(compact.description.ends_with("..."));
        assert_eq!(compact.benefits, "one; two; three");
    }

    #[test]
    fn shrink_skips_unsaved_ideas() {
        let mut unsaved = idea("Ghost");
        unsaved._id = None;
        assert!(shrink(&unsaved).is_none());
    }
}
