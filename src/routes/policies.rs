//! Policy routes
//!
//! Government policies under `/api/policies`. Admins create and update
//! them through multipart forms (optional `policyPdf` attachment whose
//! text is extracted for the AI assist), citizens browse published ones
//! and register one-way support. Create and update fan an alert out to
//! every active citizen.

use std::collections::HashMap;
use std::sync::Arc;

use bson::{doc, oid::ObjectId, Bson, DateTime, Document};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::auth::{authenticate, authenticate_optional, require_admin};
use crate::db::schemas::{
    NotificationDoc, NotificationType, PolicyDoc, PolicyStatus, Role, POLICY_CATEGORIES,
    POLICY_COLLECTION,
};
use crate::routes::respond::{
    count_field, created, error_response, json_response, load_user_refs, ok_data, ok_message,
    ok_message_data, parse_enum, parse_object_id, parse_query, parse_rfc3339, read_body_bytes,
    regex_escape, rfc3339, wrap, BoxBody, UserRef,
};
use crate::server::AppState;
use crate::services::extract_pdf_text;
use crate::services::notify;
use crate::services::uploads::{ParsedForm, UploadKind, MAX_UPLOAD_BYTES};
use crate::types::AppError;

// Multipart overhead on top of the file itself
const MAX_FORM_BYTES: usize = (MAX_UPLOAD_BYTES as usize) + 64 * 1024;

// ============================================================================
// Request / response shapes
// ============================================================================

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
}

/// Policy as returned by list and detail endpoints
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyView {
    id: String,
    title: String,
    description: String,
    category: String,
    status: PolicyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    document_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pdf_file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pdf_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    effective_date: Option<String>,
    tags: Vec<String>,
    created_by: Option<UserRef>,
    view_count: i32,
    comments_count: i32,
    support_count: i32,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl PolicyView {
    fn build(policy: &PolicyDoc, users: &HashMap<ObjectId, UserRef>) -> Self {
        Self {
            id: policy._id.map(|id| id.to_hex()).unwrap_or_default(),
            title: policy.title.clone(),
            description: policy.description.clone(),
            category: policy.category.clone(),
            status: policy.status,
            document_url: policy.document_url.clone(),
            pdf_file_path: policy.pdf_file_path.clone(),
            pdf_content: policy.pdf_content.clone(),
            summary: policy.summary.clone(),
            effective_date: policy.effective_date.and_then(rfc3339),
            tags: policy.tags.clone(),
            created_by: users.get(&policy.created_by).cloned(),
            view_count: policy.view_count,
            comments_count: policy.comments_count,
            support_count: policy.support_count,
            created_at: policy.metadata.created_at.and_then(rfc3339),
            updated_at: policy.metadata.updated_at.and_then(rfc3339),
        }
    }
}

async fn view_one(state: &AppState, policy: &PolicyDoc) -> Result<PolicyView, AppError> {
    let users = load_user_refs(&state.mongo, vec![policy.created_by]).await?;
    Ok(PolicyView::build(policy, &users))
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
        (&Method::POST, [id, "support"]) => wrap(support(req, &state, id).await),
        _ => error_response(&AppError::NotFound("Route not found".to_string())),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/policies
async fn create(req: Request<Incoming>, state: &AppState) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    require_admin(&auth)?;

    let content_type = req
        .headers()
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let body = read_body_bytes(req, MAX_FORM_BYTES).await?;
    let form = state
        .uploads
        .parse_form(UploadKind::PolicyDocument, content_type.as_deref(), body)
        .await?;

    let fields = match validate_policy_form(&form, true) {
        Ok(fields) => fields,
        Err(err) => {
            discard_upload(state, &form).await;
            return Err(err);
        }
    };

    let (pdf_file_path, pdf_content) = match &form.file {
        Some(saved) => {
            let bytes = tokio::fs::read(&saved.absolute_path).await?;
            (Some(saved.url_path.clone()), extract_pdf_text(&bytes))
        }
        None => (None, None),
    };

    let policy = PolicyDoc {
        title: fields.title.clone().unwrap_or_default(),
        description: fields.description.clone().unwrap_or_default(),
        category: fields.category.clone().unwrap_or_default(),
        status: fields.status.unwrap_or_default(),
        document_url: fields.document_url.clone().flatten(),
        pdf_file_path,
        pdf_content,
        effective_date: fields.effective_date.flatten(),
        tags: fields.tags.clone().unwrap_or_default(),
        created_by: auth.id,
        ..Default::default()
    };

    let policies = state.mongo.collection::<PolicyDoc>(POLICY_COLLECTION).await?;
    let id = match policies.insert_one(policy).await {
        Ok(id) => id,
        Err(err) => {
            discard_upload(state, &form).await;
            return Err(err);
        }
    };
    let policy = policies
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| AppError::Internal("Inserted policy vanished".to_string()))?;

    info!(policy = %id.to_hex(), category = %policy.category, "policy created");

    let message = format!(
        "New Policy Alert: \"{}\" has been introduced in the {} category.",
        policy.title, policy.category
    );
    notify::broadcast_to_role(&state.mongo, Role::Citizen, |citizen| {
        NotificationDoc::new(
            citizen,
            auth.id,
            NotificationType::AdminAlert,
            message.clone(),
        )
        .about_policy(id)
    })
    .await;

    let view = view_one(state, &policy).await?;
    Ok(created(
        "Policy created successfully",
        json!({ "policy": view }),
    ))
}

/// GET /api/policies
async fn list(req: Request<Incoming>, state: &AppState) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate_optional(req.headers(), &state.tokens, &state.mongo).await;
    let query: ListQuery = parse_query(&req);

    let page = u64::from(query.page.unwrap_or(1).max(1));
    let limit = i64::from(query.limit.unwrap_or(100).clamp(1, 500));
    let is_admin = auth.as_ref().map(|a| a.is_admin()).unwrap_or(false);

    let mut filter = Document::new();
    if let Some(category) = query
        .category
        .as_deref()
        .filter(|c| !c.is_empty() && *c != "All")
    {
        filter.insert("category", category);
    }
    let status_filter = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty() && *s != "All");
    match status_filter {
        Some(status) => {
            filter.insert("status", status);
        }
        // Without an explicit status filter citizens see published
        // policies only
        None if !is_admin => {
            filter.insert("status", PolicyStatus::Published.as_str());
        }
        None => {}
    }
    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = regex_escape(search.trim());
        filter.insert(
            "$or",
            vec![
                doc! { "title": { "$regex": &pattern, "$options": "i" } },
                doc! { "description": { "$regex": &pattern, "$options": "i" } },
            ],
        );
    }

    let direction = if query.order.as_deref() == Some("asc") { 1 } else { -1 };
    let sort_field = match query.sort_by.as_deref() {
        Some("title") => "title",
        Some("viewCount") => "view_count",
        Some("supportCount") => "support_count",
        Some("effectiveDate") => "effective_date",
        _ => "metadata.created_at",
    };
    let sort = doc! { sort_field: direction };

    let policies = state.mongo.collection::<PolicyDoc>(POLICY_COLLECTION).await?;
    let total = policies.count(filter.clone()).await?;
    let found = policies
        .find_page(filter, sort, (page - 1) * limit as u64, limit)
        .await?;

    let creator_ids: Vec<ObjectId> = found.iter().map(|policy| policy.created_by).collect();
    let users = load_user_refs(&state.mongo, creator_ids).await?;
    let views: Vec<PolicyView> = found
        .iter()
        .map(|policy| PolicyView::build(policy, &users))
        .collect();

    Ok(ok_data(json!({
        "policies": views,
        "pagination": {
            "currentPage": page,
            "totalPages": total.div_ceil(limit as u64),
            "totalPolicies": total,
            "hasMore": (page * limit as u64) < total,
        },
    })))
}

/// GET /api/policies/{id}
async fn get_one(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate_optional(req.headers(), &state.tokens, &state.mongo).await;
    let id = parse_object_id(raw_id)?;

    let policies = state.mongo.collection::<PolicyDoc>(POLICY_COLLECTION).await?;
    let policy = policies
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| AppError::NotFound("Policy not found".to_string()))?;

    let is_admin = auth.as_ref().map(|a| a.is_admin()).unwrap_or(false);
    if policy.status != PolicyStatus::Published && !is_admin {
        return Err(AppError::Forbidden(
            "This policy is not yet published".to_string(),
        ));
    }

    let policy = policies
        .find_one_and_update(doc! { "_id": id }, doc! { "$inc": { "view_count": 1 } })
        .await?
        .unwrap_or(policy);

    let has_supported = auth
        .as_ref()
        .map(|a| policy.supporters.contains(&a.id))
        .unwrap_or(false);
    let view = view_one(state, &policy).await?;

    Ok(ok_data(json!({
        "policy": view,
        "hasSupported": has_supported,
    })))
}

/// PUT /api/policies/{id}
async fn update(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    require_admin(&auth)?;
    let id = parse_object_id(raw_id)?;

    let content_type = req
        .headers()
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let body = read_body_bytes(req, MAX_FORM_BYTES).await?;
    let form = state
        .uploads
        .parse_form(UploadKind::PolicyDocument, content_type.as_deref(), body)
        .await?;

    let policies = state.mongo.collection::<PolicyDoc>(POLICY_COLLECTION).await?;
    let existing = match policies.find_one(doc! { "_id": id }).await? {
        Some(policy) => policy,
        None => {
            discard_upload(state, &form).await;
            return Err(AppError::NotFound("Policy not found".to_string()));
        }
    };

    let fields = match validate_policy_form(&form, false) {
        Ok(fields) => fields,
        Err(err) => {
            discard_upload(state, &form).await;
            return Err(err);
        }
    };

    let mut set = Document::new();
    if let Some(title) = fields.title {
        set.insert("title", title);
    }
    if let Some(description) = fields.description {
        set.insert("description", description);
    }
    if let Some(category) = fields.category {
        set.insert("category", category);
    }
    if let Some(status) = fields.status {
        set.insert("status", status.as_str());
    }
    if let Some(url) = fields.document_url {
        set.insert("document_url", url.map(Bson::from).unwrap_or(Bson::Null));
    }
    if let Some(summary) = fields.summary {
        set.insert("summary", summary.map(Bson::from).unwrap_or(Bson::Null));
    }
    if let Some(date) = fields.effective_date {
        set.insert("effective_date", date.map(Bson::from).unwrap_or(Bson::Null));
    }
    if let Some(tags) = fields.tags {
        set.insert("tags", tags);
    }

    if let Some(saved) = &form.file {
        if let Some(old) = &existing.pdf_file_path {
            state.uploads.remove(old).await;
        }
        set.insert("pdf_file_path", saved.url_path.clone());
        let bytes = tokio::fs::read(&saved.absolute_path).await?;
        if let Some(text) = extract_pdf_text(&bytes) {
            set.insert("pdf_content", text);
        }
    }
    set.insert("metadata.updated_at", DateTime::now());

    let updated = policies
        .find_one_and_update(doc! { "_id": id }, doc! { "$set": set })
        .await?
        .ok_or_else(|| AppError::NotFound("Policy not found".to_string()))?;

    let message = format!(
        "Policy Updated: \"{}\" has been updated. Check out the latest changes!",
        updated.title
    );
    notify::broadcast_to_role(&state.mongo, Role::Citizen, |citizen| {
        NotificationDoc::new(
            citizen,
            auth.id,
            NotificationType::AdminAlert,
            message.clone(),
        )
        .about_policy(id)
    })
    .await;

    let view = view_one(state, &updated).await?;
    Ok(ok_message_data(
        "Policy updated successfully",
        json!({ "policy": view }),
    ))
}

/// DELETE /api/policies/{id}
async fn delete(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    require_admin(&auth)?;
    let id = parse_object_id(raw_id)?;

    let policies = state.mongo.collection::<PolicyDoc>(POLICY_COLLECTION).await?;
    policies
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| AppError::NotFound("Policy not found".to_string()))?;

    policies.soft_delete(doc! { "_id": id }).await?;
    info!(policy = raw_id, "policy deleted");

    Ok(ok_message("Policy deleted successfully"))
}

/// POST /api/policies/{id}/support
///
/// Support is one-way. The guard on `supporters` keeps the count honest
/// when the same user double-submits.
async fn support(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    let id = parse_object_id(raw_id)?;

    let policies = state.mongo.collection::<PolicyDoc>(POLICY_COLLECTION).await?;
    let policy = policies
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| AppError::NotFound("Policy not found".to_string()))?;

    if policy.supporters.contains(&auth.id) {
        return Ok(already_supported());
    }

    let updated = policies
        .find_one_and_update(
            doc! { "_id": id, "supporters": { "$ne": auth.id } },
            doc! {
                "$addToSet": { "supporters": auth.id },
                "$inc": { "support_count": 1 },
                "$set": { "metadata.updated_at": DateTime::now() },
            },
        )
        .await?;

    match updated {
        Some(policy) => Ok(ok_message_data(
            "Support added successfully",
            json!({
                "supportCount": policy.support_count,
                "alreadySupported": true,
            }),
        )),
        // Lost the race with a concurrent support from the same user
        None => Ok(already_supported()),
    }
}

/// GET /api/policies/admin/stats
async fn stats(req: Request<Incoming>, state: &AppState) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    require_admin(&auth)?;

    let policies = state.mongo.collection::<PolicyDoc>(POLICY_COLLECTION).await?;
    let total = policies.count(doc! {}).await?;
    let draft = policies
        .count(doc! { "status": PolicyStatus::Draft.as_str() })
        .await?;
    let published = policies
        .count(doc! { "status": PolicyStatus::Published.as_str() })
        .await?;
    let under_review = policies
        .count(doc! { "status": PolicyStatus::UnderReview.as_str() })
        .await?;

    let by_category = policies
        .aggregate(vec![
            doc! { "$match": { "metadata.is_deleted": { "$ne": true } } },
            doc! { "$group": { "_id": "$category", "count": { "$sum": 1 } } },
            doc! { "$sort": { "count": -1 } },
        ])
        .await?;
    let policies_by_category: Vec<serde_json::Value> = by_category
        .iter()
        .map(|row| {
            json!({
                "_id": row.get_str("_id").unwrap_or_default(),
                "count": count_field(row, "count"),
            })
        })
        .collect();

    let most_viewed_docs = policies
        .find_page(
            doc! { "status": PolicyStatus::Published.as_str() },
            doc! { "view_count": -1 },
            0,
            5,
        )
        .await?;
    let most_viewed: Vec<serde_json::Value> = most_viewed_docs
        .iter()
        .map(|policy| {
            json!({
                "_id": policy._id.map(|id| id.to_hex()).unwrap_or_default(),
                "title": policy.title,
                "viewCount": policy.view_count,
                "category": policy.category,
            })
        })
        .collect();

    Ok(ok_data(json!({ "stats": {
        "totalPolicies": total,
        "draftPolicies": draft,
        "publishedPolicies": published,
        "underReviewPolicies": under_review,
        "policiesByCategory": policies_by_category,
        "mostViewed": most_viewed,
    }})))
}

// ============================================================================
// Helpers
// ============================================================================

/// Validated text fields from a policy multipart form.
///
/// The outer Option tracks whether the field was present at all; the
/// inner one (where it exists) distinguishes "clear this" from a value.
#[derive(Debug, Default)]
struct PolicyFields {
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    status: Option<PolicyStatus>,
    document_url: Option<Option<String>>,
    summary: Option<Option<String>>,
    effective_date: Option<Option<DateTime>>,
    tags: Option<Vec<String>>,
}

fn validate_policy_form(form: &ParsedForm, creating: bool) -> Result<PolicyFields, AppError> {
    let mut fields = PolicyFields::default();

    match form.field("title").map(str::trim) {
        Some(title) if !title.is_empty() => {
            if !(10..=200).contains(&title.chars().count()) {
                return Err(AppError::Validation(
                    "Title must be 10-200 characters".to_string(),
                ));
            }
            fields.title = Some(title.to_string());
        }
        _ if creating => {
            return Err(AppError::Validation("Title is required".to_string()));
        }
        _ => {}
    }

    match form.field("description").map(str::trim) {
        Some(description) if !description.is_empty() => {
            if description.chars().count() < 50 {
                return Err(AppError::Validation(
                    "Description must be at least 50 characters".to_string(),
                ));
            }
            fields.description = Some(description.to_string());
        }
        _ if creating => {
            return Err(AppError::Validation("Description is required".to_string()));
        }
        _ => {}
    }

    match form.field("category").map(str::trim) {
        Some(category) if !category.is_empty() => {
            if !POLICY_CATEGORIES.contains(&category) {
                return Err(AppError::Validation("Invalid category".to_string()));
            }
            fields.category = Some(category.to_string());
        }
        _ if creating => {
            return Err(AppError::Validation("Category is required".to_string()));
        }
        _ => {}
    }

    if let Some(raw) = form.field("status").map(str::trim).filter(|s| !s.is_empty()) {
        let status: PolicyStatus = parse_enum(raw)
            .ok_or_else(|| AppError::Validation("Invalid status value".to_string()))?;
        fields.status = Some(status);
    }

    if let Some(raw) = form.field("documentUrl") {
        let trimmed = raw.trim();
        fields.document_url = Some(if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        });
    }

    if let Some(raw) = form.field("summary") {
        let trimmed = raw.trim();
        fields.summary = Some(if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        });
    }

    if let Some(raw) = form.field("effectiveDate") {
        let trimmed = raw.trim();
        fields.effective_date = Some(if trimmed.is_empty() {
            None
        } else {
            let date = parse_rfc3339(trimmed)
                .ok_or_else(|| AppError::Validation("Invalid effective date".to_string()))?;
            Some(date)
        });
    }

    if let Some(raw) = form.field("tags") {
        fields.tags = Some(parse_tags(raw));
    }

    Ok(fields)
}

/// Tags arrive as either a JSON array or a comma-separated string
fn parse_tags(raw: &str) -> Vec<String> {
    if let Ok(tags) = serde_json::from_str::<Vec<String>>(raw) {
        return tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
    }
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn already_supported() -> Response<BoxBody> {
    json_response(
        StatusCode::BAD_REQUEST,
        &json!({
            "success": false,
            "message": "You have already supported this policy",
            "alreadySupported": true,
        }),
    )
}

async fn discard_upload(state: &AppState, form: &ParsedForm) {
    if let Some(saved) = &form.file {
        state.uploads.remove(&saved.url_path).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form_with(fields: &[(&str, &str)]) -> ParsedForm {
        let mut form = ParsedForm::default();
        for (name, value) in fields {
            form.fields.insert(name.to_string(), value.to_string());
        }
        form
    }

    #[test]
    fn create_requires_core_fields() {
        let err = validate_policy_form(&ParsedForm::default(), true).unwrap_err();
        assert!(matches!(err, AppError::Validation(m) if m == "Title is required"));

        let err = validate_policy_form(
            &form_with(&[("title", "Clean air action plan 2026")]),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(m) if m == "Description is required"));
    }

    #[test]
    fn update_accepts_partial_forms() {
        let fields =
            validate_policy_form(&form_with(&[("status", "Published")]), false).unwrap();
        assert_eq!(fields.status, Some(PolicyStatus::Published));
        assert!(fields.title.is_none());
    }

    #[test]
    fn category_must_be_known() {
        let err = validate_policy_form(
            &form_with(&[
                ("title", "Clean air action plan 2026"),
                (
                    "description",
                    "A multi-year program to reduce particulate emissions across the metro region.",
                ),
                ("category", "Astrology"),
            ]),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(m) if m == "Invalid category"));
    }

    #[test]
    fn tags_parse_both_encodings() {
        assert_eq!(
            parse_tags(r#"["air", "health"]"#),
            vec!["air".to_string(), "health".to_string()]
        );
        assert_eq!(
            parse_tags("air, health , "),
            vec!["air".to_string(), "health".to_string()]
        );
    }

    #[test]
    fn empty_fields_clear_optional_values() {
        let fields = validate_policy_form(
            &form_with(&[("documentUrl", ""), ("summary", "  ")]),
            false,
        )
        .unwrap();
        assert_eq!(fields.document_url, Some(None));
        assert_eq!(fields.summary, Some(None));
    }
}
