//! Idea routes
//!
//! Citizen policy proposals under `/api/ideas`: submission, filtered
//! listing, voting, government responses, and implementation tracking.
//! Status edits run through the lifecycle transition guard; votes are
//! single-statement atomic updates.

use std::collections::HashMap;
use std::sync::Arc;

use bson::{doc, oid::ObjectId, DateTime, Document};
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::auth::{authenticate, require_admin};
use crate::db::schemas::{
    EstimatedBudget, GovernmentResponse, IdeaDoc, IdeaPriority, IdeaStatus, IdeaTimeline,
    ImpactScope, ImplementationUpdate, NotificationDoc, NotificationType, Role, Visibility,
    IDEA_CATEGORIES, IDEA_COLLECTION,
};
use crate::routes::respond::{
    count_field, created, error_response, load_user_refs, ok_data, ok_message, ok_message_data,
    parse_enum, parse_json_body, parse_object_id, parse_query, parse_rfc3339, regex_escape,
    rfc3339, wrap, BoxBody, UserRef,
};
use crate::server::AppState;
use crate::services::notify;
use crate::types::AppError;

const PAGE_SIZE: u32 = 12;

// ============================================================================
// Request shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct BudgetBody {
    amount: Option<i64>,
    currency: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TimelineBody {
    proposed: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: String,
    sub_category: Option<String>,
    #[serde(default)]
    target_area: String,
    #[serde(default)]
    expected_impact: String,
    estimated_budget: Option<BudgetBody>,
    timeline: Option<TimelineBody>,
    #[serde(default)]
    benefits: Vec<String>,
    #[serde(default)]
    challenges: Vec<String>,
    #[serde(default)]
    resources: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    visibility: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBody {
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    sub_category: Option<String>,
    target_area: Option<String>,
    expected_impact: Option<String>,
    estimated_budget: Option<BudgetBody>,
    timeline: Option<TimelineBody>,
    benefits: Option<Vec<String>>,
    challenges: Option<Vec<String>>,
    resources: Option<Vec<String>>,
    tags: Option<Vec<String>>,
    visibility: Option<String>,
    // Admin-only fields, ignored for owners
    status: Option<String>,
    priority: Option<String>,
    is_featured: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseBody {
    status: Option<String>,
    #[serde(default)]
    message: String,
    new_status: Option<String>,
    estimated_implementation_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImplementationBody {
    start_date: Option<String>,
    completion_date: Option<String>,
    progress: Option<i32>,
    update_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    page: Option<u32>,
    limit: Option<u32>,
    category: Option<String>,
    status: Option<String>,
    search: Option<String>,
    sort_by: Option<String>,
    order: Option<String>,
    my_ideas: Option<String>,
}

// ============================================================================
// Response shapes
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GovernmentResponseView {
    status: Option<String>,
    message: String,
    responded_by: String,
    responded_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    estimated_implementation_date: Option<String>,
}

impl From<&GovernmentResponse> for GovernmentResponseView {
    fn from(response: &GovernmentResponse) -> Self {
        Self {
            status: response.status.clone(),
            message: response.message.clone(),
            responded_by: response.responded_by.to_hex(),
            responded_at: rfc3339(response.responded_at),
            estimated_implementation_date: response
                .estimated_implementation_date
                .and_then(rfc3339),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BudgetStampView {
    allocated_budget: i64,
    allocation_plan: String,
    allocated_at: Option<String>,
    allocated_by: String,
    priority_score: f64,
    justification: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImplementationEntryView {
    message: String,
    updated_by: String,
    updated_at: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImplementationView {
    start_date: Option<String>,
    completion_date: Option<String>,
    progress: i32,
    updates: Vec<ImplementationEntryView>,
}

/// Full idea as returned by list and detail endpoints
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeaView {
    id: String,
    title: String,
    description: String,
    category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sub_category: Option<String>,
    target_area: String,
    expected_impact: ImpactScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    estimated_budget: Option<EstimatedBudget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeline: Option<IdeaTimeline>,
    benefits: Vec<String>,
    challenges: Vec<String>,
    resources: Vec<String>,
    tags: Vec<String>,
    submitted_by: Option<UserRef>,
    status: IdeaStatus,
    priority: IdeaPriority,
    visibility: Visibility,
    upvote_count: i32,
    downvote_count: i32,
    view_count: i32,
    share_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    government_response: Option<GovernmentResponseView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    budget_allocation: Option<BudgetStampView>,
    implementation: ImplementationView,
    is_featured: bool,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl IdeaView {
    fn build(idea: &IdeaDoc, users: &HashMap<ObjectId, UserRef>) -> Self {
        Self {
            id: idea._id.map(|id| id.to_hex()).unwrap_or_default(),
            title: idea.title.clone(),
            description: idea.description.clone(),
            category: idea.category.clone(),
            sub_category: idea.sub_category.clone(),
            target_area: idea.target_area.clone(),
            expected_impact: idea.expected_impact,
            estimated_budget: idea.estimated_budget.clone(),
            timeline: idea.timeline.clone(),
            benefits: idea.benefits.clone(),
            challenges: idea.challenges.clone(),
            resources: idea.resources.clone(),
            tags: idea.tags.clone(),
            submitted_by: users.get(&idea.submitted_by).cloned(),
            status: idea.status,
            priority: idea.priority,
            visibility: idea.visibility,
            upvote_count: idea.upvote_count,
            downvote_count: idea.downvote_count,
            view_count: idea.view_count,
            share_count: idea.share_count,
            government_response: idea
                .government_response
                .as_ref()
                .map(GovernmentResponseView::from),
            budget_allocation: idea.budget_allocation.as_ref().map(|stamp| BudgetStampView {
                allocated_budget: stamp.allocated_budget,
                allocation_plan: stamp.allocation_plan.to_hex(),
                allocated_at: rfc3339(stamp.allocated_at),
                allocated_by: stamp.allocated_by.to_hex(),
                priority_score: stamp.priority_score,
                justification: stamp.justification.clone(),
            }),
            implementation: ImplementationView {
                start_date: idea.implementation.start_date.and_then(rfc3339),
                completion_date: idea.implementation.completion_date.and_then(rfc3339),
                progress: idea.implementation.progress,
                updates: idea
                    .implementation
                    .updates
                    .iter()
                    .map(|entry| ImplementationEntryView {
                        message: entry.message.clone(),
                        updated_by: entry.updated_by.to_hex(),
                        updated_at: rfc3339(entry.updated_at),
                    })
                    .collect(),
            },
            is_featured: idea.is_featured,
            created_at: idea.metadata.created_at.and_then(rfc3339),
            updated_at: idea.metadata.updated_at.and_then(rfc3339),
        }
    }
}

async fn view_one(state: &AppState, idea: &IdeaDoc) -> Result<IdeaView, AppError> {
    let users = load_user_refs(&state.mongo, vec![idea.submitted_by]).await?;
    Ok(IdeaView::build(idea, &users))
}

// ============================================================================
// Dispatch
// ============================================================================

pub async fn handle(req: Request<Incoming>, state: Arc<AppState>, rest: &str) -> Response<BoxBody> {
    let method = req.method().clone();
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    match (&method, segments.as_slice()) {
        (&Method::GET, ["admin", "stats"]) => wrap(stats(req, &state).await),
        (&Method::GET, []) => wrap(list(req, &state).await),
        (&Method::GET, [id]) => wrap(get_one(req, &state, id).await),
        (&Method::POST, []) => wrap(create(req, &state).await),
        (&Method::PUT, [id]) => wrap(update(req, &state, id).await),
        (&Method::DELETE, [id]) => wrap(delete(req, &state, id).await),
        (&Method::POST, [id, "upvote"]) => wrap(vote(req, &state, id, Vote::Up).await),
        (&Method::POST, [id, "downvote"]) => wrap(vote(req, &state, id, Vote::Down).await),
        (&Method::POST, [id, "response"]) => wrap(respond_to_idea(req, &state, id).await),
        (&Method::PUT, [id, "implementation"]) => wrap(implementation(req, &state, id).await),
        _ => error_response(&AppError::NotFound("Route not found".to_string())),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/ideas
async fn create(req: Request<Incoming>, state: &AppState) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    let body: SubmitBody = parse_json_body(req).await?;

    let title = body.title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("Title is required".to_string()));
    }
    if !(10..=200).contains(&title.chars().count()) {
        return Err(AppError::Validation(
            "Title must be 10-200 characters".to_string(),
        ));
    }

    let description = body.description.trim();
    if description.is_empty() {
        return Err(AppError::Validation("Description is required".to_string()));
    }
    if description.chars().count() < 50 {
        return Err(AppError::Validation(
            "Description must be at least 50 characters".to_string(),
        ));
    }

    let category = body.category.trim();
    if category.is_empty() {
        return Err(AppError::Validation("Category is required".to_string()));
    }
    if !IDEA_CATEGORIES.contains(&category) {
        return Err(AppError::Validation(
            "Please select a valid category".to_string(),
        ));
    }

    let target_area = body.target_area.trim();
    if target_area.is_empty() {
        return Err(AppError::Validation("Target area is required".to_string()));
    }

    if body.expected_impact.trim().is_empty() {
        return Err(AppError::Validation(
            "Expected impact is required".to_string(),
        ));
    }
    let expected_impact: ImpactScope = parse_enum(body.expected_impact.trim()).ok_or_else(|| {
        AppError::Validation("Expected impact must be Local, District, State, or National".to_string())
    })?;

    let visibility = match body.visibility.as_deref() {
        None | Some("") => Visibility::Public,
        Some(raw) => parse_enum(raw).ok_or_else(|| {
            AppError::Validation("Visibility must be Public or Private".to_string())
        })?,
    };

    let idea = IdeaDoc {
        title: title.to_string(),
        description: description.to_string(),
        category: category.to_string(),
        sub_category: body.sub_category.and_then(non_blank),
        target_area: target_area.to_string(),
        expected_impact,
        estimated_budget: convert_budget(body.estimated_budget)?,
        timeline: convert_timeline(body.timeline),
        benefits: clean_list(body.benefits),
        challenges: clean_list(body.challenges),
        resources: clean_list(body.resources),
        tags: clean_list(body.tags),
        submitted_by: auth.id,
        visibility,
        ..Default::default()
    };

    let ideas = state.mongo.collection::<IdeaDoc>(IDEA_COLLECTION).await?;
    let id = ideas.insert_one(idea).await?;
    let idea = ideas
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| AppError::Internal("Inserted idea vanished".to_string()))?;

    info!(idea = %id.to_hex(), category = %idea.category, "idea submitted");

    let message = format!(
        "New idea submitted: \"{}\" in {} category.",
        idea.title, idea.category
    );
    notify::broadcast_to_role(&state.mongo, Role::Admin, |admin| {
        NotificationDoc::new(
            admin,
            auth.id,
            NotificationType::IdeaSubmitted,
            message.clone(),
        )
        .about_idea(id)
    })
    .await;

    let view = view_one(state, &idea).await?;
    Ok(created("Idea submitted successfully", json!({ "idea": view })))
}

/// GET /api/ideas
async fn list(req: Request<Incoming>, state: &AppState) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    let query: ListQuery = parse_query(&req);

    let page = u64::from(query.page.unwrap_or(1).max(1));
    let limit = i64::from(query.limit.unwrap_or(PAGE_SIZE).clamp(1, 100));
    let my_ideas = query.my_ideas.as_deref() == Some("true");

    let mut filter = Document::new();
    if my_ideas {
        filter.insert("submitted_by", auth.id);
    }
    // Private ideas are listed only to admins and their owners
    if !auth.is_admin() && !my_ideas {
        filter.insert("visibility", "Public");
    }
    if let Some(category) = query
        .category
        .as_deref()
        .filter(|c| !c.is_empty() && *c != "All")
    {
        filter.insert("category", category);
    }
    if let Some(status) = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty() && *s != "All")
    {
        filter.insert("status", status);
    }
    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = regex_escape(search.trim());
        filter.insert(
            "$or",
            vec![
                doc! { "title": { "$regex": &pattern, "$options": "i" } },
                doc! { "description": { "$regex": &pattern, "$options": "i" } },
                doc! { "tags": { "$regex": &pattern, "$options": "i" } },
            ],
        );
    }

    let sort = match query.sort_by.as_deref() {
        Some("popular") => doc! { "upvote_count": -1 },
        Some("trending") => doc! { "view_count": -1 },
        _ => {
            let direction = if query.order.as_deref() == Some("asc") { 1 } else { -1 };
            doc! { "metadata.created_at": direction }
        }
    };

    let ideas = state.mongo.collection::<IdeaDoc>(IDEA_COLLECTION).await?;
    let total = ideas.count(filter.clone()).await?;
    let found = ideas
        .find_page(filter, sort, (page - 1) * limit as u64, limit)
        .await?;

    let submitter_ids: Vec<ObjectId> = found.iter().map(|idea| idea.submitted_by).collect();
    let users = load_user_refs(&state.mongo, submitter_ids).await?;
    let views: Vec<IdeaView> = found
        .iter()
        .map(|idea| IdeaView::build(idea, &users))
        .collect();

    Ok(ok_data(json!({
        "ideas": views,
        "pagination": {
            "currentPage": page,
            "totalPages": total.div_ceil(limit as u64),
            "totalIdeas": total,
            "hasMore": (page * limit as u64) < total,
        },
    })))
}

/// GET /api/ideas/{id}
async fn get_one(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    let id = parse_object_id(raw_id)?;

    let ideas = state.mongo.collection::<IdeaDoc>(IDEA_COLLECTION).await?;
    let idea = ideas
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| AppError::NotFound("Idea not found".to_string()))?;

    if idea.visibility == Visibility::Private
        && !auth.is_admin()
        && idea.submitted_by != auth.id
    {
        return Err(AppError::Forbidden(
            "You do not have permission to view this idea".to_string(),
        ));
    }

    let idea = ideas
        .find_one_and_update(doc! { "_id": id }, doc! { "$inc": { "view_count": 1 } })
        .await?
        .unwrap_or(idea);

    let has_upvoted = idea.upvotes.contains(&auth.id);
    let has_downvoted = idea.downvotes.contains(&auth.id);
    let view = view_one(state, &idea).await?;

    Ok(ok_data(json!({
        "idea": view,
        "hasUpvoted": has_upvoted,
        "hasDownvoted": has_downvoted,
    })))
}

/// PUT /api/ideas/{id}
async fn update(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    let id = parse_object_id(raw_id)?;
    let body: UpdateBody = parse_json_body(req).await?;

    let ideas = state.mongo.collection::<IdeaDoc>(IDEA_COLLECTION).await?;
    let idea = ideas
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| AppError::NotFound("Idea not found".to_string()))?;

    if !auth.is_admin() && idea.submitted_by != auth.id {
        return Err(AppError::Forbidden(
            "You do not have permission to update this idea".to_string(),
        ));
    }

    let mut set = Document::new();

    if let Some(title) = body.title.as_deref() {
        let title = title.trim();
        if !(10..=200).contains(&title.chars().count()) {
            return Err(AppError::Validation(
                "Title must be 10-200 characters".to_string(),
            ));
        }
        set.insert("title", title);
    }
    if let Some(description) = body.description.as_deref() {
        let description = description.trim();
        if description.chars().count() < 50 {
            return Err(AppError::Validation(
                "Description must be at least 50 characters".to_string(),
            ));
        }
        set.insert("description", description);
    }
    if let Some(category) = body.category.as_deref() {
        if !IDEA_CATEGORIES.contains(&category.trim()) {
            return Err(AppError::Validation(
                "Please select a valid category".to_string(),
            ));
        }
        set.insert("category", category.trim());
    }
    if let Some(sub_category) = body.sub_category.as_deref() {
        set.insert("sub_category", sub_category.trim());
    }
    if let Some(target_area) = body.target_area.as_deref() {
        let target_area = target_area.trim();
        if target_area.is_empty() {
            return Err(AppError::Validation("Target area is required".to_string()));
        }
        set.insert("target_area", target_area);
    }
    if let Some(raw) = body.expected_impact.as_deref() {
        let impact: ImpactScope = parse_enum(raw.trim()).ok_or_else(|| {
            AppError::Validation(
                "Expected impact must be Local, District, State, or National".to_string(),
            )
        })?;
        set.insert("expected_impact", impact.as_str());
    }
    if body.estimated_budget.is_some() {
        let budget = convert_budget(body.estimated_budget)?;
        set.insert("estimated_budget", to_bson(&budget)?);
    }
    if body.timeline.is_some() {
        set.insert("timeline", to_bson(&convert_timeline(body.timeline))?);
    }
    if let Some(benefits) = body.benefits {
        set.insert("benefits", clean_list(benefits));
    }
    if let Some(challenges) = body.challenges {
        set.insert("challenges", clean_list(challenges));
    }
    if let Some(resources) = body.resources {
        set.insert("resources", clean_list(resources));
    }
    if let Some(tags) = body.tags {
        set.insert("tags", clean_list(tags));
    }
    if let Some(raw) = body.visibility.as_deref() {
        let visibility: Visibility = parse_enum(raw).ok_or_else(|| {
            AppError::Validation("Visibility must be Public or Private".to_string())
        })?;
        set.insert("visibility", to_bson(&visibility)?);
    }

    if auth.is_admin() {
        if let Some(raw) = body.status.as_deref() {
            let next: IdeaStatus = parse_enum(raw)
                .ok_or_else(|| AppError::Validation("Invalid status value".to_string()))?;
            if !idea.status.can_transition(next) {
                return Err(AppError::Validation(format!(
                    "Cannot change status from {} to {}",
                    idea.status.as_str(),
                    next.as_str()
                )));
            }
            set.insert("status", next.as_str());
        }
        if let Some(raw) = body.priority.as_deref() {
            let priority: IdeaPriority = parse_enum(raw)
                .ok_or_else(|| AppError::Validation("Invalid priority value".to_string()))?;
            set.insert("priority", to_bson(&priority)?);
        }
        if let Some(featured) = body.is_featured {
            set.insert("is_featured", featured);
        }
    }

    set.insert("metadata.updated_at", DateTime::now());
    let updated = ideas
        .find_one_and_update(doc! { "_id": id }, doc! { "$set": set })
        .await?
        .ok_or_else(|| AppError::NotFound("Idea not found".to_string()))?;

    let view = view_one(state, &updated).await?;
    Ok(ok_message_data(
        "Idea updated successfully",
        json!({ "idea": view }),
    ))
}

/// DELETE /api/ideas/{id}
async fn delete(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    let id = parse_object_id(raw_id)?;

    let ideas = state.mongo.collection::<IdeaDoc>(IDEA_COLLECTION).await?;
    let idea = ideas
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| AppError::NotFound("Idea not found".to_string()))?;

    if !auth.is_admin() && idea.submitted_by != auth.id {
        return Err(AppError::Forbidden(
            "You do not have permission to delete this idea".to_string(),
        ));
    }

    ideas.soft_delete(doc! { "_id": id }).await?;
    info!(idea = raw_id, "idea deleted");

    Ok(ok_message("Idea deleted successfully"))
}

#[derive(Clone, Copy)]
enum Vote {
    Up,
    Down,
}

/// POST /api/ideas/{id}/upvote and /downvote
///
/// One atomic pipeline update: add to the chosen set, pull from the
/// opposite set, recompute both counts from the arrays.
async fn vote(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
    direction: Vote,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    let id = parse_object_id(raw_id)?;
    let voter = auth.id;

    let (gains, loses) = match direction {
        Vote::Up => ("upvotes", "downvotes"),
        Vote::Down => ("downvotes", "upvotes"),
    };
    let update = vec![
        doc! { "$set": {
            gains: { "$setUnion": [format!("${gains}"), [voter]] },
            loses: { "$setDifference": [format!("${loses}"), [voter]] },
        }},
        doc! { "$set": {
            "upvote_count": { "$size": "$upvotes" },
            "downvote_count": { "$size": "$downvotes" },
            "metadata.updated_at": "$$NOW",
        }},
    ];

    let ideas = state.mongo.collection::<IdeaDoc>(IDEA_COLLECTION).await?;
    let updated = ideas
        .find_one_and_update(doc! { "_id": id }, update)
        .await?
        .ok_or_else(|| AppError::NotFound("Idea not found".to_string()))?;

    let message = match direction {
        Vote::Up => "Upvote recorded",
        Vote::Down => "Downvote recorded",
    };
    Ok(ok_message_data(
        message,
        json!({
            "upvoteCount": updated.upvote_count,
            "downvoteCount": updated.downvote_count,
        }),
    ))
}

/// POST /api/ideas/{id}/response
async fn respond_to_idea(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    require_admin(&auth)?;
    let id = parse_object_id(raw_id)?;
    let body: ResponseBody = parse_json_body(req).await?;

    let message = body.message.trim();
    if message.is_empty() {
        return Err(AppError::Validation(
            "Response message is required".to_string(),
        ));
    }

    let ideas = state.mongo.collection::<IdeaDoc>(IDEA_COLLECTION).await?;
    let idea = ideas
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| AppError::NotFound("Idea not found".to_string()))?;

    let estimated = match body.estimated_implementation_date.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(parse_rfc3339(raw).ok_or_else(|| {
            AppError::Validation("Invalid estimated implementation date".to_string())
        })?),
    };
    let response = GovernmentResponse {
        status: body.status.and_then(non_blank),
        message: message.to_string(),
        responded_by: auth.id,
        responded_at: DateTime::now(),
        estimated_implementation_date: estimated,
    };

    let mut set = doc! {
        "government_response": to_bson(&response)?,
        "metadata.updated_at": DateTime::now(),
    };
    if let Some(raw) = body.new_status.as_deref() {
        let next: IdeaStatus = parse_enum(raw)
            .ok_or_else(|| AppError::Validation("Invalid status value".to_string()))?;
        if !idea.status.can_transition(next) {
            return Err(AppError::Validation(format!(
                "Cannot change status from {} to {}",
                idea.status.as_str(),
                next.as_str()
            )));
        }
        set.insert("status", next.as_str());
    }

    let updated = ideas
        .find_one_and_update(doc! { "_id": id }, doc! { "$set": set })
        .await?
        .ok_or_else(|| AppError::NotFound("Idea not found".to_string()))?;

    notify::deliver(
        &state.mongo,
        NotificationDoc::new(
            updated.submitted_by,
            auth.id,
            NotificationType::IdeaResponse,
            format!("Government has responded to your idea: \"{}\"", updated.title),
        )
        .about_idea(id),
    )
    .await;

    let view = view_one(state, &updated).await?;
    Ok(ok_message_data(
        "Response added successfully",
        json!({ "idea": view }),
    ))
}

/// PUT /api/ideas/{id}/implementation
async fn implementation(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    require_admin(&auth)?;
    let id = parse_object_id(raw_id)?;
    let body: ImplementationBody = parse_json_body(req).await?;

    let mut set = Document::new();
    if let Some(raw) = body.start_date.as_deref() {
        let ts = parse_rfc3339(raw)
            .ok_or_else(|| AppError::Validation("Invalid start date".to_string()))?;
        set.insert("implementation.start_date", ts);
    }
    if let Some(raw) = body.completion_date.as_deref() {
        let ts = parse_rfc3339(raw)
            .ok_or_else(|| AppError::Validation("Invalid completion date".to_string()))?;
        set.insert("implementation.completion_date", ts);
    }
    if let Some(progress) = body.progress {
        if !(0..=100).contains(&progress) {
            return Err(AppError::Validation(
                "Progress must be between 0 and 100".to_string(),
            ));
        }
        set.insert("implementation.progress", progress);
    }
    set.insert("metadata.updated_at", DateTime::now());

    let mut update = doc! { "$set": set };
    if let Some(message) = body.update_message.as_deref().filter(|m| !m.trim().is_empty()) {
        let entry = ImplementationUpdate {
            message: message.trim().to_string(),
            updated_by: auth.id,
            updated_at: DateTime::now(),
        };
        update.insert("$push", doc! { "implementation.updates": to_bson(&entry)? });
    }

    let ideas = state.mongo.collection::<IdeaDoc>(IDEA_COLLECTION).await?;
    let updated = ideas
        .find_one_and_update(doc! { "_id": id }, update)
        .await?
        .ok_or_else(|| AppError::NotFound("Idea not found".to_string()))?;

    notify::deliver(
        &state.mongo,
        NotificationDoc::new(
            updated.submitted_by,
            auth.id,
            NotificationType::IdeaUpdate,
            format!("Implementation update for your idea: \"{}\"", updated.title),
        )
        .about_idea(id),
    )
    .await;

    let view = view_one(state, &updated).await?;
    Ok(ok_message_data(
        "Implementation updated successfully",
        json!({ "idea": view }),
    ))
}

/// GET /api/ideas/admin/stats
async fn stats(req: Request<Incoming>, state: &AppState) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    require_admin(&auth)?;

    let ideas = state.mongo.collection::<IdeaDoc>(IDEA_COLLECTION).await?;
    let total = ideas.count(doc! {}).await?;
    let submitted = ideas
        .count(doc! { "status": IdeaStatus::Submitted.as_str() })
        .await?;
    let under_review = ideas
        .count(doc! { "status": IdeaStatus::UnderReview.as_str() })
        .await?;
    let approved = ideas
        .count(doc! { "status": IdeaStatus::Approved.as_str() })
        .await?;
    let implemented = ideas
        .count(doc! { "status": IdeaStatus::Implemented.as_str() })
        .await?;

    let by_category = ideas
        .aggregate(vec![
            doc! { "$match": { "metadata.is_deleted": { "$ne": true } } },
            doc! { "$group": { "_id": "$category", "count": { "$sum": 1 } } },
            doc! { "$sort": { "count": -1 } },
        ])
        .await?;
    let ideas_by_category: Vec<serde_json::Value> = by_category
        .iter()
        .map(|row| {
            json!({
                "_id": row.get_str("_id").unwrap_or_default(),
                "count": count_field(row, "count"),
            })
        })
        .collect();

    let top = ideas
        .find_page(doc! {}, doc! { "upvote_count": -1 }, 0, 5)
        .await?;
    let recent = ideas
        .find_page(doc! {}, doc! { "metadata.created_at": -1 }, 0, 5)
        .await?;

    let mut submitter_ids: Vec<ObjectId> = top.iter().map(|idea| idea.submitted_by).collect();
    submitter_ids.extend(recent.iter().map(|idea| idea.submitted_by));
    let users = load_user_refs(&state.mongo, submitter_ids).await?;
    let submitter_name = |idea: &IdeaDoc| {
        users
            .get(&idea.submitted_by)
            .map(|user| user.name.clone())
            .unwrap_or_default()
    };

    let top_ideas: Vec<serde_json::Value> = top
        .iter()
        .map(|idea| {
            json!({
                "_id": idea._id.map(|id| id.to_hex()).unwrap_or_default(),
                "title": idea.title,
                "upvoteCount": idea.upvote_count,
                "category": idea.category,
                "status": idea.status.as_str(),
                "submittedBy": { "name": submitter_name(idea) },
            })
        })
        .collect();
    let recent_ideas: Vec<serde_json::Value> = recent
        .iter()
        .map(|idea| {
            json!({
                "_id": idea._id.map(|id| id.to_hex()).unwrap_or_default(),
                "title": idea.title,
                "category": idea.category,
                "status": idea.status.as_str(),
                "createdAt": idea.metadata.created_at.and_then(rfc3339),
                "submittedBy": { "name": submitter_name(idea) },
            })
        })
        .collect();

    Ok(ok_data(json!({ "stats": {
        "totalIdeas": total,
        "submittedIdeas": submitted,
        "underReviewIdeas": under_review,
        "approvedIdeas": approved,
        "implementedIdeas": implemented,
        "ideasByCategory": ideas_by_category,
        "topIdeas": top_ideas,
        "recentIdeas": recent_ideas,
    }})))
}

// ============================================================================
// Helpers
// ============================================================================

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .filter_map(non_blank)
        .collect()
}

fn convert_budget(body: Option<BudgetBody>) -> Result<Option<EstimatedBudget>, AppError> {
    let Some(body) = body else {
        return Ok(None);
    };
    if let Some(amount) = body.amount {
        if amount < 0 {
            return Err(AppError::Validation(
                "Estimated budget cannot be negative".to_string(),
            ));
        }
    }
    Ok(Some(EstimatedBudget {
        amount: body.amount,
        currency: body
            .currency
            .and_then(non_blank)
            .unwrap_or_else(|| "INR".to_string()),
        description: body.description.and_then(non_blank),
    }))
}

fn convert_timeline(body: Option<TimelineBody>) -> Option<IdeaTimeline> {
    body.map(|timeline| IdeaTimeline {
        proposed: timeline.proposed.and_then(non_blank),
        description: timeline.description.and_then(non_blank),
    })
}

fn to_bson<T: Serialize>(value: &T) -> Result<bson::Bson, AppError> {
    bson::to_bson(value).map_err(|e| AppError::Internal(format!("BSON encoding failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_strings_dropped() {
        assert_eq!(non_blank("  ".to_string()), None);
        assert_eq!(non_blank(" x ".to_string()), Some("x".to_string()));
        assert_eq!(
            clean_list(vec!["a".to_string(), " ".to_string(), " b ".to_string()]),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn budget_conversion_guards_sign() {
        let negative = convert_budget(Some(BudgetBody {
            amount: Some(-5),
            currency: None,
            description: None,
        }));
        assert!(matches!(negative, Err(AppError::Validation(_))));

        let ok = convert_budget(Some(BudgetBody {
            amount: Some(5_000_000),
            currency: None,
            description: Some("pilot".to_string()),
        }))
        .unwrap()
        .unwrap();
        assert_eq!(ok.currency, "INR");
        assert_eq!(ok.amount, Some(5_000_000));
    }

    #[test]
    fn view_serializes_camel_case() {
        let idea = IdeaDoc {
            title: "Solar-powered street lighting for ward 12".to_string(),
            upvote_count: 3,
            ..Default::default()
        };
        let view = IdeaView::build(&idea, &HashMap::new());
        let encoded = serde_json::to_string(&view).unwrap();
        assert!(encoded.contains("\"upvoteCount\":3"));
        assert!(encoded.contains("\"targetArea\""));
        assert!(encoded.contains("\"status\":\"Submitted\""));
        assert!(!encoded.contains("upvote_count"));
    }
}
