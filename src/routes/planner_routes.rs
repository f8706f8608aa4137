//! Budget-planner routes
//!
//! Admin-only endpoints under `/api/agents/budget-planner`: run an
//! allocation analysis over the Approved idea slate, edit the draft,
//! approve it (which funds the ideas and notifies submitters), list
//! past plans, and export a plan as a PDF report.

use std::collections::HashMap;
use std::sync::Arc;

use bson::{doc, oid::ObjectId, DateTime};
use chrono::{Datelike, Utc};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::auth::{authenticate, require_admin};
use crate::db::schemas::{
    AllocationLine, BudgetAllocationDoc, IdeaDoc, IdeaStatus, PlanStatus, Tier,
    BUDGET_ALLOCATION_COLLECTION, IDEA_COLLECTION,
};
use crate::planner::{fund_allocated_ideas, BudgetPlanner, PlannerOutcome, PlannerSettings};
use crate::routes::respond::{
    error_response, full_body, json_response, load_user_refs, ok_data, ok_message_data,
    parse_json_body, parse_object_id, rfc3339, wrap, BoxBody, UserRef,
};
use crate::server::AppState;
use crate::services::{render_allocation_report, report_filename, IdeaRef, ReportMeta};
use crate::types::AppError;

// ============================================================================
// Request shapes
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeBody {
    total_budget: Option<i64>,
    fiscal_year: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineBody {
    idea: String,
    allocated_budget: i64,
    priority_score: f64,
    priority: Tier,
    justification: String,
    #[serde(default)]
    estimated_timeline: Option<String>,
    #[serde(default, rename = "expectedROI")]
    expected_roi: Option<Tier>,
}

#[derive(Debug, Deserialize)]
struct EditBody {
    allocations: Option<Vec<LineBody>>,
    summary: Option<String>,
    recommendations: Option<Vec<String>>,
}

// ============================================================================
// Response shapes
// ============================================================================

/// Idea fields shown per allocation line
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IdeaCardView {
    id: String,
    title: String,
    category: String,
    status: IdeaStatus,
    submitted_by: String,
}

impl From<&IdeaDoc> for IdeaCardView {
    fn from(idea: &IdeaDoc) -> Self {
        Self {
            id: idea._id.map(|id| id.to_hex()).unwrap_or_default(),
            title: idea.title.clone(),
            category: idea.category.clone(),
            status: idea.status,
            submitted_by: idea.submitted_by.to_hex(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AllocationLineView {
    idea: Option<IdeaCardView>,
    allocated_budget: i64,
    priority_score: f64,
    priority: Tier,
    justification: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    estimated_timeline: Option<String>,
    #[serde(rename = "expectedROI", skip_serializing_if = "Option::is_none")]
    expected_roi: Option<Tier>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanView {
    id: String,
    total_budget: i64,
    allocated_budget: i64,
    contingency_reserve: i64,
    allocations: Vec<AllocationLineView>,
    summary: String,
    recommendations: Vec<String>,
    status: PlanStatus,
    created_by: Option<UserRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    approved_by: Option<UserRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    approved_at: Option<String>,
    fiscal_year: String,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl PlanView {
    fn build(
        plan: &BudgetAllocationDoc,
        users: &HashMap<ObjectId, UserRef>,
        ideas: &HashMap<ObjectId, IdeaDoc>,
    ) -> Self {
        Self {
            id: plan._id.map(|id| id.to_hex()).unwrap_or_default(),
            total_budget: plan.total_budget,
            allocated_budget: plan.allocated_budget,
            contingency_reserve: plan.contingency_reserve,
            allocations: plan
                .allocations
                .iter()
                .map(|line| AllocationLineView {
                    idea: ideas.get(&line.idea).map(IdeaCardView::from),
                    allocated_budget: line.allocated_budget,
                    priority_score: line.priority_score,
                    priority: line.priority,
                    justification: line.justification.clone(),
                    estimated_timeline: line.estimated_timeline.clone(),
                    expected_roi: line.expected_roi,
                })
                .collect(),
            summary: plan.summary.clone(),
            recommendations: plan.recommendations.clone(),
            status: plan.status,
            created_by: users.get(&plan.created_by).cloned(),
            approved_by: plan.approved_by.and_then(|id| users.get(&id).cloned()),
            approved_at: plan.approved_at.and_then(rfc3339),
            fiscal_year: plan.fiscal_year.clone(),
            created_at: plan.metadata.created_at.and_then(rfc3339),
            updated_at: plan.metadata.updated_at.and_then(rfc3339),
        }
    }
}

async fn view_many(
    state: &AppState,
    plans: &[BudgetAllocationDoc],
) -> Result<Vec<PlanView>, AppError> {
    let mut idea_ids: Vec<ObjectId> = Vec::new();
    let mut user_ids: Vec<ObjectId> = Vec::new();
    for plan in plans {
        idea_ids.extend(plan.allocations.iter().map(|line| line.idea));
        user_ids.push(plan.created_by);
        user_ids.extend(plan.approved_by);
    }
    idea_ids.sort_unstable();
    idea_ids.dedup();
    user_ids.sort_unstable();
    user_ids.dedup();

    let ideas = load_ideas(state, idea_ids).await?;
    let users = load_user_refs(&state.mongo, user_ids).await?;
    Ok(plans
        .iter()
        .map(|plan| PlanView::build(plan, &users, &ideas))
        .collect())
}

async fn view_one(state: &AppState, plan: &BudgetAllocationDoc) -> Result<PlanView, AppError> {
    let mut views = view_many(state, std::slice::from_ref(plan)).await?;
    views
        .pop()
        .ok_or_else(|| AppError::Internal("Failed to assemble plan view".to_string()))
}

/// Batched lookup of the ideas a plan references, keyed by id
async fn load_ideas(
    state: &AppState,
    ids: Vec<ObjectId>,
) -> Result<HashMap<ObjectId, IdeaDoc>, AppError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let ideas = state.mongo.collection::<IdeaDoc>(IDEA_COLLECTION).await?;
    let found = ideas.find_many(doc! { "_id": { "$in": ids } }).await?;
    Ok(found
        .into_iter()
        .filter_map(|idea| idea._id.map(|id| (id, idea)))
        .collect())
}

// ============================================================================
// Dispatch
// ============================================================================

pub async fn handle(req: Request<Incoming>, state: Arc<AppState>, rest: &str) -> Response<BoxBody> {
    let method = req.method().clone();
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    match (&method, segments.as_slice()) {
        (&Method::POST, ["budget-planner", "analyze"]) => wrap(analyze(req, &state).await),
        (&Method::GET, ["budget-planner"]) => wrap(list(req, &state).await),
        (&Method::PUT, ["budget-planner", id]) => wrap(update(req, &state, id).await),
        (&Method::POST, ["budget-planner", id, "approve"]) => wrap(approve(req, &state, id).await),
        (&Method::GET, ["budget-planner", id, "pdf"]) => wrap(export_pdf(req, &state, id).await),
        _ => error_response(&AppError::NotFound("Route not found".to_string())),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/agents/budget-planner/analyze
async fn analyze(req: Request<Incoming>, state: &AppState) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    require_admin(&auth)?;
    let body: AnalyzeBody = parse_json_body(req).await?;

    let total_budget = body
        .total_budget
        .filter(|budget| *budget > 0)
        .ok_or_else(|| AppError::Validation("Valid total budget is required".to_string()))?;

    let ideas = state.mongo.collection::<IdeaDoc>(IDEA_COLLECTION).await?;
    let approved = ideas
        .find_many(doc! { "status": IdeaStatus::Approved.as_str() })
        .await?;

    let settings = PlannerSettings {
        sufficiency_fail_open: state.args.planner_sufficiency_fail_open,
        scoring_fail_open: state.args.planner_scoring_fail_open,
        summary_fail_open: state.args.planner_summary_fail_open,
    };
    let planner = BudgetPlanner::new(state.delegate.as_ref(), settings);

    let draft = match planner.run(total_budget, &approved).await? {
        PlannerOutcome::Insufficient(report) => {
            return Ok(json_response(
                StatusCode::BAD_REQUEST,
                &json!({
                    "success": false,
                    "insufficientBudget": true,
                    "message": format!("Insufficient Budget: {}", report.message),
                    "data": report,
                }),
            ));
        }
        PlannerOutcome::Plan(draft) => draft,
    };

    let analyzed = draft.analyzed_count;
    let plan = BudgetAllocationDoc {
        total_budget: draft.total_budget,
        allocated_budget: draft.allocated_budget,
        contingency_reserve: draft.contingency_reserve,
        allocations: draft.allocations,
        summary: draft.summary,
        recommendations: draft.recommendations,
        status: PlanStatus::Draft,
        created_by: auth.id,
        fiscal_year: fiscal_year_or_current(body.fiscal_year),
        ..Default::default()
    };

    let plans = state
        .mongo
        .collection::<BudgetAllocationDoc>(BUDGET_ALLOCATION_COLLECTION)
        .await?;
    let plan_id = plans.insert_one(plan).await?;
    let saved = plans
        .find_one(doc! { "_id": plan_id })
        .await?
        .ok_or_else(|| AppError::Internal("Failed to load saved budget allocation".to_string()))?;

    info!(plan = %plan_id, ideas = analyzed, "budget analysis saved as draft");

    let view = view_one(state, &saved).await?;
    Ok(ok_message_data("Budget analysis completed successfully", view))
}

/// PUT /api/agents/budget-planner/:id
async fn update(
    req: Request<Incoming>,
    state: &AppState,
    id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    require_admin(&auth)?;
    let plan_id = parse_object_id(id)?;
    let body: EditBody = parse_json_body(req).await?;

    let plans = state
        .mongo
        .collection::<BudgetAllocationDoc>(BUDGET_ALLOCATION_COLLECTION)
        .await?;
    let plan = plans
        .find_one(doc! { "_id": plan_id })
        .await?
        .ok_or_else(|| AppError::NotFound("Budget allocation not found".to_string()))?;

    if plan.status == PlanStatus::Approved {
        return Err(AppError::Validation(
            "Cannot edit approved budget allocation".to_string(),
        ));
    }

    let mut set = doc! { "metadata.updated_at": DateTime::now() };

    if let Some(lines) = body.allocations {
        let lines = convert_lines(lines)?;
        let allocated: i64 = lines.iter().map(|line| line.allocated_budget).sum();
        set.insert("allocations", to_bson(&lines)?);
        set.insert("allocated_budget", allocated);
        set.insert("contingency_reserve", plan.total_budget - allocated);
    }
    if let Some(summary) = body.summary.filter(|s| !s.trim().is_empty()) {
        set.insert("summary", summary);
    }
    if let Some(recommendations) = body.recommendations {
        set.insert("recommendations", recommendations);
    }

    let updated = plans
        .find_one_and_update(doc! { "_id": plan_id }, doc! { "$set": set })
        .await?
        .ok_or_else(|| AppError::NotFound("Budget allocation not found".to_string()))?;

    let view = view_one(state, &updated).await?;
    Ok(ok_message_data("Budget allocation updated successfully", view))
}

/// POST /api/agents/budget-planner/:id/approve
async fn approve(
    req: Request<Incoming>,
    state: &AppState,
    id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    require_admin(&auth)?;
    let plan_id = parse_object_id(id)?;

    let plans = state
        .mongo
        .collection::<BudgetAllocationDoc>(BUDGET_ALLOCATION_COLLECTION)
        .await?;
    let plan = plans
        .find_one(doc! { "_id": plan_id })
        .await?
        .ok_or_else(|| AppError::NotFound("Budget allocation not found".to_string()))?;

    if plan.status == PlanStatus::Approved {
        return Err(AppError::Validation(
            "Budget allocation already approved".to_string(),
        ));
    }

    // Status guard keeps a concurrent second approval from funding twice
    let approved = plans
        .find_one_and_update(
            doc! {
                "_id": plan_id,
                "status": { "$ne": PlanStatus::Approved.as_str() },
            },
            doc! {
                "$set": {
                    "status": PlanStatus::Approved.as_str(),
                    "approved_by": auth.id,
                    "approved_at": DateTime::now(),
                    "metadata.updated_at": DateTime::now(),
                }
            },
        )
        .await?
        .ok_or_else(|| {
            AppError::Validation("Budget allocation already approved".to_string())
        })?;

    let report = fund_allocated_ideas(&state.mongo, &approved, auth.id).await?;
    info!(
        plan = %plan_id,
        funded = report.funded,
        skipped = report.skipped.len(),
        "budget allocation approved"
    );

    let view = view_one(state, &approved).await?;
    Ok(ok_message_data(
        "Budget allocation approved successfully. All citizens have been notified.",
        view,
    ))
}

/// GET /api/agents/budget-planner
async fn list(req: Request<Incoming>, state: &AppState) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    require_admin(&auth)?;

    let plans = state
        .mongo
        .collection::<BudgetAllocationDoc>(BUDGET_ALLOCATION_COLLECTION)
        .await?;
    let all = plans
        .find_page(doc! {}, doc! { "metadata.created_at": -1 }, 0, 1000)
        .await?;

    let views = view_many(state, &all).await?;
    Ok(ok_data(views))
}

/// GET /api/agents/budget-planner/:id/pdf
async fn export_pdf(
    req: Request<Incoming>,
    state: &AppState,
    id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    require_admin(&auth)?;
    let plan_id = parse_object_id(id)?;

    let plans = state
        .mongo
        .collection::<BudgetAllocationDoc>(BUDGET_ALLOCATION_COLLECTION)
        .await?;
    let plan = plans
        .find_one(doc! { "_id": plan_id })
        .await?
        .ok_or_else(|| AppError::NotFound("Budget allocation not found".to_string()))?;

    let meta = report_meta(state, &plan).await?;
    let bytes = render_allocation_report(&plan, &meta)?;
    let filename = report_filename(&plan.fiscal_year);

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/pdf")
        .header(
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", filename),
        )
        .header("Access-Control-Allow-Origin", "*")
        .body(full_body(bytes))
        .map_err(|e| AppError::Internal(format!("Failed to build PDF response: {}", e)))
}

// ============================================================================
// Helpers
// ============================================================================

/// Resolve the names and idea titles the PDF report shows
async fn report_meta(
    state: &AppState,
    plan: &BudgetAllocationDoc,
) -> Result<ReportMeta, AppError> {
    let mut user_ids = vec![plan.created_by];
    user_ids.extend(plan.approved_by);
    let users = load_user_refs(&state.mongo, user_ids).await?;

    let idea_ids: Vec<ObjectId> = plan.allocations.iter().map(|line| line.idea).collect();
    let ideas = load_ideas(state, idea_ids).await?;

    Ok(ReportMeta {
        created_by: users.get(&plan.created_by).map(|user| user.name.clone()),
        approved_by: plan
            .approved_by
            .and_then(|id| users.get(&id))
            .map(|user| user.name.clone()),
        ideas: ideas
            .into_iter()
            .map(|(id, idea)| {
                (
                    id,
                    IdeaRef {
                        title: idea.title,
                        category: idea.category,
                    },
                )
            })
            .collect(),
    })
}

fn fiscal_year_or_current(provided: Option<String>) -> String {
    provided
        .filter(|year| !year.trim().is_empty())
        .unwrap_or_else(|| Utc::now().year().to_string())
}

fn convert_lines(lines: Vec<LineBody>) -> Result<Vec<AllocationLine>, AppError> {
    lines
        .into_iter()
        .map(|line| {
            let idea = ObjectId::parse_str(&line.idea).map_err(|_| {
                AppError::Validation(format!("Invalid idea id in allocations: {}", line.idea))
            })?;
            Ok(AllocationLine {
                idea,
                allocated_budget: line.allocated_budget,
                priority_score: line.priority_score,
                priority: line.priority,
                justification: line.justification,
                estimated_timeline: line.estimated_timeline,
                expected_roi: line.expected_roi,
            })
        })
        .collect()
}

fn to_bson<T: Serialize>(value: &T) -> Result<bson::Bson, AppError> {
    bson::to_bson(value).map_err(|e| AppError::Internal(format!("BSON encoding failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_fiscal_year_falls_back_to_current() {
        let current = Utc::now().year().to_string();
        assert_eq!(fiscal_year_or_current(None), current);
        assert_eq!(fiscal_year_or_current(Some("   ".to_string())), current);
        assert_eq!(
            fiscal_year_or_current(Some("2025-26".to_string())),
            "2025-26"
        );
    }

    #[test]
    fn line_bodies_convert_and_totals_follow() {
        let idea = ObjectId::new();
        let lines = vec![
            LineBody {
                idea: idea.to_hex(),
                allocated_budget: 4_000_000,
                priority_score: 88.0,
                priority: Tier::High,
                justification: "serves three wards".to_string(),
                estimated_timeline: Some("6 months".to_string()),
                expected_roi: Some(Tier::High),
            },
            LineBody {
                idea: ObjectId::new().to_hex(),
                allocated_budget: 1_500_000,
                priority_score: 55.0,
                priority: Tier::Medium,
                justification: "pilot only".to_string(),
                estimated_timeline: None,
                expected_roi: None,
            },
        ];

        let converted = convert_lines(lines).unwrap();
        assert_eq!(converted[0].idea, idea);
        assert_eq!(converted[0].priority, Tier::High);
        let total: i64 = converted.iter().map(|l| l.allocated_budget).sum();
        assert_eq!(total, 5_500_000);
    }

    #[test]
    fn malformed_line_id_is_rejected() {
        let lines = vec![LineBody {
            idea: "not-an-id".to_string(),
            allocated_budget: 100,
            priority_score: 10.0,
            priority: Tier::Low,
            justification: "x".to_string(),
            estimated_timeline: None,
            expected_roi: None,
        }];
        assert!(matches!(
            convert_lines(lines),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn plan_view_serializes_wire_names() {
        let idea_id = ObjectId::new();
        let plan = BudgetAllocationDoc {
            _id: Some(ObjectId::new()),
            total_budget: 100_000_000,
            allocated_budget: 90_000_000,
            contingency_reserve: 10_000_000,
            allocations: vec![AllocationLine {
                idea: idea_id,
                allocated_budget: 9_000_000,
                priority_score: 85.0,
                priority: Tier::High,
                justification: "high impact".to_string(),
                estimated_timeline: Some("6 months".to_string()),
                expected_roi: Some(Tier::High),
            }],
            summary: "Balanced plan".to_string(),
            recommendations: vec!["Monitor closely".to_string()],
            status: PlanStatus::Draft,
            created_by: ObjectId::new(),
            fiscal_year: "2026".to_string(),
            ..Default::default()
        };

        let view = PlanView::build(&plan, &HashMap::new(), &HashMap::new());
        let value = serde_json::to_value(&view).unwrap();

        assert_eq!(value["totalBudget"], 100_000_000);
        assert_eq!(value["contingencyReserve"], 10_000_000);
        assert_eq!(value["fiscalYear"], "2026");
        assert_eq!(value["status"], "Draft");
        assert_eq!(value["allocations"][0]["expectedROI"], "High");
        assert_eq!(value["allocations"][0]["priorityScore"], 85.0);
        // Unresolvable idea reference serializes as null, not an error
        assert!(value["allocations"][0]["idea"].is_null());
    }
}
