//! Concern routes
//!
//! Citizen-reported local issues under `/api/concerns`: submission with
//! an optional photo, public browsing, upvote toggling, embedded
//! discussion comments, admin status changes, and the citizen dashboard
//! feed. Listing and detail need no login; everything that writes does.

use std::collections::HashMap;
use std::sync::Arc;

use bson::{doc, oid::ObjectId, DateTime, Document};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::auth::{authenticate, require_admin};
use crate::db::schemas::{
    ConcernComment, ConcernDoc, ConcernStatus, Coordinates, NotificationDoc, NotificationType,
    PolicyDoc, PolicyStatus, CONCERN_CATEGORIES, CONCERN_COLLECTION, NOTIFICATION_COLLECTION,
    POLICY_COLLECTION,
};
use crate::routes::respond::{
    error_response, json_response, load_user_refs, ok_data, ok_message, parse_enum,
    parse_json_body, parse_object_id, parse_query, read_body_bytes, rfc3339, wrap, BoxBody,
    UserRef,
};
use crate::server::AppState;
use crate::services::notify;
use crate::services::uploads::{ParsedForm, SavedFile, UploadKind, MAX_UPLOAD_BYTES};
use crate::types::AppError;

const PAGE_SIZE: u32 = 10;
const MAX_FORM_BYTES: usize = (MAX_UPLOAD_BYTES as usize) + 64 * 1024;

// ============================================================================
// Request shapes
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct SubmitBody {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    location: String,
    lat: Option<f64>,
    lng: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct CommentBody {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    status: Option<String>,
    category: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

// ============================================================================
// Response shapes
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommentView {
    user: Option<UserRef>,
    text: String,
    created_at: Option<String>,
    is_official: bool,
}

/// Full concern as returned by list and detail endpoints
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcernView {
    id: String,
    title: String,
    description: String,
    category: String,
    location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    coordinates: Option<Coordinates>,
    status: ConcernStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
    created_by: Option<UserRef>,
    upvotes: Vec<String>,
    comments: Vec<CommentView>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl ConcernView {
    fn build(concern: &ConcernDoc, users: &HashMap<ObjectId, UserRef>) -> Self {
        Self {
            id: concern._id.map(|id| id.to_hex()).unwrap_or_default(),
            title: concern.title.clone(),
            description: concern.description.clone(),
            category: concern.category.clone(),
            location: concern.location.clone(),
            coordinates: concern.coordinates.clone(),
            status: concern.status,
            image_url: concern.image_url.clone(),
            created_by: users.get(&concern.created_by).cloned(),
            upvotes: concern.upvotes.iter().map(|id| id.to_hex()).collect(),
            comments: concern
                .comments
                .iter()
                .map(|comment| CommentView {
                    user: users.get(&comment.user).cloned(),
                    text: comment.text.clone(),
                    created_at: rfc3339(comment.created_at),
                    is_official: comment.is_official,
                })
                .collect(),
            created_at: concern.metadata.created_at.and_then(rfc3339),
            updated_at: concern.metadata.updated_at.and_then(rfc3339),
        }
    }
}

/// Everyone referenced by these concerns: reporters plus comment authors
fn referenced_users(concerns: &[ConcernDoc]) -> Vec<ObjectId> {
    let mut ids: Vec<ObjectId> = Vec::new();
    for concern in concerns {
        ids.push(concern.created_by);
        ids.extend(concern.comments.iter().map(|c| c.user));
    }
    ids
}

async fn view_many(
    state: &AppState,
    concerns: &[ConcernDoc],
) -> Result<Vec<ConcernView>, AppError> {
    let users = load_user_refs(&state.mongo, referenced_users(concerns)).await?;
    Ok(concerns
        .iter()
        .map(|concern| ConcernView::build(concern, &users))
        .collect())
}

async fn view_one(state: &AppState, concern: &ConcernDoc) -> Result<ConcernView, AppError> {
    let users =
        load_user_refs(&state.mongo, referenced_users(std::slice::from_ref(concern))).await?;
    Ok(ConcernView::build(concern, &users))
}

// ============================================================================
// Dispatch
// ============================================================================

pub async fn handle(req: Request<Incoming>, state: Arc<AppState>, rest: &str) -> Response<BoxBody> {
    let method = req.method().clone();
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    match (&method, segments.as_slice()) {
        (&Method::GET, ["my", "all"]) => wrap(my_concerns(req, &state).await),
        (&Method::GET, ["citizen", "stats"]) => wrap(citizen_stats(req, &state).await),
        (&Method::GET, []) => wrap(list(req, &state).await),
        (&Method::POST, []) => wrap(create(req, &state).await),
        (&Method::PUT, [id, "upvote"]) => wrap(upvote(req, &state, id).await),
        (&Method::POST, [id, "comments"]) => wrap(add_comment(req, &state, id).await),
        (&Method::PUT, [id, "status"]) => wrap(update_status(req, &state, id).await),
        (&Method::DELETE, [id]) => wrap(delete(req, &state, id).await),
        (&Method::GET, [id]) => wrap(get_one(req, &state, id).await),
        _ => error_response(&AppError::NotFound("Route not found".to_string())),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/concerns
///
/// Accepts multipart (optional `image` part) or a plain JSON body.
async fn create(req: Request<Incoming>, state: &AppState) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;

    let content_type = req
        .headers()
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let (body, image): (SubmitBody, Option<SavedFile>) = if content_type
        .as_deref()
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false)
    {
        let bytes = read_body_bytes(req, MAX_FORM_BYTES).await?;
        let form = state
            .uploads
            .parse_form(UploadKind::ConcernImage, content_type.as_deref(), bytes)
            .await?;
        (submit_body_from_form(&form), form.file)
    } else {
        (parse_json_body(req).await?, None)
    };

    let (title, description, category, location) = match validate_submission(&body) {
        Ok(fields) => fields,
        Err(err) => {
            if let Some(saved) = &image {
                state.uploads.remove(&saved.url_path).await;
            }
            return Err(err);
        }
    };

    let coordinates = if body.lat.is_some() || body.lng.is_some() {
        Some(Coordinates {
            lat: body.lat,
            lng: body.lng,
        })
    } else {
        None
    };

    let concern = ConcernDoc {
        title,
        description,
        category,
        location,
        coordinates,
        image_url: image.as_ref().map(|saved| saved.url_path.clone()),
        created_by: auth.id,
        ..Default::default()
    };

    let concerns = state.mongo.collection::<ConcernDoc>(CONCERN_COLLECTION).await?;
    let id = match concerns.insert_one(concern).await {
        Ok(id) => id,
        Err(err) => {
            if let Some(saved) = &image {
                state.uploads.remove(&saved.url_path).await;
            }
            return Err(err);
        }
    };
    let concern = concerns
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| AppError::Internal("Inserted concern vanished".to_string()))?;

    info!(concern = %id.to_hex(), category = %concern.category, "concern submitted");

    let view = view_one(state, &concern).await?;
    Ok(json_response(
        StatusCode::CREATED,
        &json!({ "success": true, "data": view }),
    ))
}

/// GET /api/concerns
async fn list(req: Request<Incoming>, state: &AppState) -> Result<Response<BoxBody>, AppError> {
    let query: ListQuery = parse_query(&req);
    let page = u64::from(query.page.unwrap_or(1).max(1));
    let limit = i64::from(query.limit.unwrap_or(PAGE_SIZE).clamp(1, 100));

    let mut filter = Document::new();
    if let Some(status) = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty() && *s != "All")
    {
        filter.insert("status", status);
    }
    if let Some(category) = query
        .category
        .as_deref()
        .filter(|c| !c.is_empty() && *c != "All")
    {
        filter.insert("category", category);
    }

    let concerns = state.mongo.collection::<ConcernDoc>(CONCERN_COLLECTION).await?;
    let total = concerns.count(filter.clone()).await?;
    let found = concerns
        .find_page(
            filter,
            doc! { "metadata.created_at": -1 },
            (page - 1) * limit as u64,
            limit,
        )
        .await?;
    let views = view_many(state, &found).await?;

    Ok(json_response(
        StatusCode::OK,
        &json!({
            "success": true,
            "count": views.len(),
            "total": total,
            "totalPages": total.div_ceil(limit as u64),
            "currentPage": page,
            "data": views,
        }),
    ))
}

/// GET /api/concerns/my/all
async fn my_concerns(
    req: Request<Incoming>,
    state: &AppState,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;

    let concerns = state.mongo.collection::<ConcernDoc>(CONCERN_COLLECTION).await?;
    let found = concerns
        .find_page(
            doc! { "created_by": auth.id },
            doc! { "metadata.created_at": -1 },
            0,
            1000,
        )
        .await?;
    let views = view_many(state, &found).await?;

    Ok(json_response(
        StatusCode::OK,
        &json!({
            "success": true,
            "count": views.len(),
            "data": views,
        }),
    ))
}

/// GET /api/concerns/{id}
async fn get_one(
    _req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let id = parse_object_id(raw_id)?;

    let concerns = state.mongo.collection::<ConcernDoc>(CONCERN_COLLECTION).await?;
    let concern = concerns
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| AppError::NotFound("Concern not found".to_string()))?;

    let view = view_one(state, &concern).await?;
    Ok(ok_data(json!(view)))
}

/// PUT /api/concerns/{id}/status
async fn update_status(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    require_admin(&auth)?;
    let id = parse_object_id(raw_id)?;
    let body: StatusBody = parse_json_body(req).await?;

    let status: ConcernStatus = parse_enum(body.status.trim())
        .ok_or_else(|| AppError::Validation("Invalid status value".to_string()))?;

    let concerns = state.mongo.collection::<ConcernDoc>(CONCERN_COLLECTION).await?;
    let updated = concerns
        .find_one_and_update(
            doc! { "_id": id },
            doc! { "$set": {
                "status": status.as_str(),
                "metadata.updated_at": DateTime::now(),
            }},
        )
        .await?
        .ok_or_else(|| AppError::NotFound("Concern not found".to_string()))?;

    notify::deliver(
        &state.mongo,
        NotificationDoc::new(
            updated.created_by,
            auth.id,
            NotificationType::StatusUpdate,
            format!(
                "The status of your concern \"{}\" has been updated to \"{}\".",
                updated.title,
                status.as_str()
            ),
        )
        .about_concern(id),
    )
    .await;

    let view = view_one(state, &updated).await?;
    Ok(ok_data(json!(view)))
}

/// DELETE /api/concerns/{id}
///
/// Admins delete anything; reporters only their own while still Pending.
async fn delete(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    let id = parse_object_id(raw_id)?;

    let concerns = state.mongo.collection::<ConcernDoc>(CONCERN_COLLECTION).await?;
    let concern = concerns
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| AppError::NotFound("Concern not found".to_string()))?;

    let is_owner = concern.created_by == auth.id;
    if !auth.is_admin() && !(is_owner && concern.status == ConcernStatus::Pending) {
        return Err(AppError::Forbidden(
            "Not authorized to delete this concern".to_string(),
        ));
    }

    if let Some(image_url) = &concern.image_url {
        state.uploads.remove(image_url).await;
    }
    concerns.delete_one(doc! { "_id": id }).await?;
    info!(concern = raw_id, "concern deleted");

    Ok(ok_message("Concern deleted successfully"))
}

/// PUT /api/concerns/{id}/upvote
///
/// Toggle, resolved atomically: membership decides between pull and add
/// inside a single pipeline update.
async fn upvote(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    let id = parse_object_id(raw_id)?;
    let voter = auth.id;

    let update = vec![doc! { "$set": {
        "upvotes": {
            "$cond": [
                { "$in": [voter, "$upvotes"] },
                { "$setDifference": ["$upvotes", [voter]] },
                { "$setUnion": ["$upvotes", [voter]] },
            ]
        },
        "metadata.updated_at": "$$NOW",
    }}];

    let concerns = state.mongo.collection::<ConcernDoc>(CONCERN_COLLECTION).await?;
    let updated = concerns
        .find_one_and_update(doc! { "_id": id }, update)
        .await?
        .ok_or_else(|| AppError::NotFound("Concern not found".to_string()))?;

    let view = view_one(state, &updated).await?;
    Ok(ok_data(json!(view)))
}

/// POST /api/concerns/{id}/comments
async fn add_comment(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    let id = parse_object_id(raw_id)?;
    let body: CommentBody = parse_json_body(req).await?;

    let text = body.text.trim();
    if text.is_empty() {
        return Err(AppError::Validation("Comment text is required".to_string()));
    }

    let comment = ConcernComment {
        user: auth.id,
        text: text.to_string(),
        created_at: DateTime::now(),
        is_official: auth.is_admin(),
    };
    let encoded = bson::to_bson(&comment)
        .map_err(|e| AppError::Internal(format!("BSON encoding failed: {}", e)))?;

    let concerns = state.mongo.collection::<ConcernDoc>(CONCERN_COLLECTION).await?;
    let updated = concerns
        .find_one_and_update(
            doc! { "_id": id },
            doc! {
                "$push": { "comments": encoded },
                "$set": { "metadata.updated_at": DateTime::now() },
            },
        )
        .await?
        .ok_or_else(|| AppError::NotFound("Concern not found".to_string()))?;

    if updated.created_by != auth.id {
        notify::deliver(
            &state.mongo,
            NotificationDoc::new(
                updated.created_by,
                auth.id,
                NotificationType::NewComment,
                format!(
                    "{} commented on your concern: \"{}\"",
                    auth.user.name,
                    truncate_preview(text, 50)
                ),
            )
            .about_concern(id),
        )
        .await;
    }

    let view = CommentView {
        user: Some(UserRef::from(&auth.user)),
        text: comment.text,
        created_at: rfc3339(comment.created_at),
        is_official: comment.is_official,
    };
    Ok(json_response(
        StatusCode::CREATED,
        &json!({ "success": true, "data": view }),
    ))
}

/// GET /api/concerns/citizen/stats
async fn citizen_stats(
    req: Request<Incoming>,
    state: &AppState,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;

    let concerns = state.mongo.collection::<ConcernDoc>(CONCERN_COLLECTION).await?;
    let notifications = state
        .mongo
        .collection::<NotificationDoc>(NOTIFICATION_COLLECTION)
        .await?;
    let policies = state.mongo.collection::<PolicyDoc>(POLICY_COLLECTION).await?;

    let my_concerns = concerns.count(doc! { "created_by": auth.id }).await?;
    let in_progress = concerns
        .count(doc! {
            "created_by": auth.id,
            "status": ConcernStatus::InProgress.as_str(),
        })
        .await?;
    let resolved = concerns
        .count(doc! {
            "created_by": auth.id,
            "status": ConcernStatus::Resolved.as_str(),
        })
        .await?;
    let global_resolved = concerns
        .count(doc! { "status": ConcernStatus::Resolved.as_str() })
        .await?;
    let unread = notifications
        .count(doc! { "recipient": auth.id, "is_read": false })
        .await?;

    let recent_concerns = concerns
        .find_page(doc! {}, doc! { "metadata.created_at": -1 }, 0, 5)
        .await?;
    let recent_policies = policies
        .find_page(
            doc! { "status": PolicyStatus::Published.as_str() },
            doc! { "metadata.created_at": -1 },
            0,
            3,
        )
        .await?;

    let reporter_ids: Vec<ObjectId> = recent_concerns.iter().map(|c| c.created_by).collect();
    let users = load_user_refs(&state.mongo, reporter_ids).await?;

    // Interleave both feeds newest-first
    let mut activities: Vec<(Option<DateTime>, serde_json::Value)> = Vec::new();
    for concern in &recent_concerns {
        let author = users
            .get(&concern.created_by)
            .map(|user| user.name.clone())
            .unwrap_or_else(|| "Anonymous".to_string());
        activities.push((
            concern.metadata.created_at,
            json!({
                "id": concern._id.map(|id| id.to_hex()).unwrap_or_default(),
                "type": "concern",
                "title": concern.title,
                "status": concern.status.as_str(),
                "date": concern.metadata.created_at.and_then(rfc3339),
                "author": author,
            }),
        ));
    }
    for policy in &recent_policies {
        activities.push((
            policy.metadata.created_at,
            json!({
                "id": policy._id.map(|id| id.to_hex()).unwrap_or_default(),
                "type": "policy",
                "title": policy.title,
                "status": policy.status.as_str(),
                "date": policy.metadata.created_at.and_then(rfc3339),
                "author": "Administration",
            }),
        ));
    }
    activities.sort_by(|a, b| b.0.cmp(&a.0));
    let recent_activities: Vec<serde_json::Value> =
        activities.into_iter().take(5).map(|(_, row)| row).collect();

    Ok(ok_data(json!({
        "stats": {
            "myConcerns": my_concerns,
            "inProgress": in_progress,
            "resolved": resolved,
            "unreadNotifications": unread,
            "globalResolved": global_resolved,
        },
        "recentActivities": recent_activities,
    })))
}

// ============================================================================
// Helpers
// ============================================================================

fn submit_body_from_form(form: &ParsedForm) -> SubmitBody {
    SubmitBody {
        title: form.field("title").unwrap_or_default().to_string(),
        description: form.field("description").unwrap_or_default().to_string(),
        category: form.field("category").unwrap_or_default().to_string(),
        location: form.field("location").unwrap_or_default().to_string(),
        lat: form.field("lat").and_then(|v| v.trim().parse().ok()),
        lng: form.field("lng").and_then(|v| v.trim().parse().ok()),
    }
}

fn validate_submission(body: &SubmitBody) -> Result<(String, String, String, String), AppError> {
    let title = body.title.trim();
    if title.is_empty() {
        return Err(AppError::Validation(
            "Please provide a title for your concern".to_string(),
        ));
    }
    if title.chars().count() > 100 {
        return Err(AppError::Validation(
            "Title cannot exceed 100 characters".to_string(),
        ));
    }

    let description = body.description.trim();
    if description.is_empty() {
        return Err(AppError::Validation(
            "Please provide a description".to_string(),
        ));
    }
    if description.chars().count() > 1000 {
        return Err(AppError::Validation(
            "Description cannot exceed 1000 characters".to_string(),
        ));
    }

    let category = body.category.trim();
    if category.is_empty() {
        return Err(AppError::Validation("Please select a category".to_string()));
    }
    if !CONCERN_CATEGORIES.contains(&category) {
        return Err(AppError::Validation(
            "Please select a valid category".to_string(),
        ));
    }

    let location = body.location.trim();
    if location.is_empty() {
        return Err(AppError::Validation(
            "Please specify the location".to_string(),
        ));
    }

    Ok((
        title.to_string(),
        description.to_string(),
        category.to_string(),
        location.to_string(),
    ))
}

fn truncate_preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_body() -> SubmitBody {
        SubmitBody {
            title: "Broken street light".to_string(),
            description: "The light at the corner of 5th and Main has been out for a week."
                .to_string(),
            category: "Infrastructure".to_string(),
            location: "5th and Main".to_string(),
            lat: Some(12.97),
            lng: Some(77.59),
        }
    }

    #[test]
    fn submission_requires_all_core_fields() {
        let mut body = valid_body();
        body.title = "  ".to_string();
        let err = validate_submission(&body).unwrap_err();
        assert!(
            matches!(err, AppError::Validation(m) if m == "Please provide a title for your concern")
        );

        let mut body = valid_body();
        body.location = String::new();
        let err = validate_submission(&body).unwrap_err();
        assert!(matches!(err, AppError::Validation(m) if m == "Please specify the location"));
    }

    #[test]
    fn misspelled_utilities_category_is_the_valid_one() {
        let mut body = valid_body();
        body.category = "Utlities".to_string();
        assert!(validate_submission(&body).is_ok());

        body.category = "Utilities".to_string();
        assert!(validate_submission(&body).is_err());
    }

    #[test]
    fn comment_preview_truncates_long_text() {
        assert_eq!(truncate_preview("short", 50), "short");
        let long = "x".repeat(60);
        let preview = truncate_preview(&long, 50);
        assert_eq!(preview.chars().count(), 53);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn form_fields_map_onto_submission() {
        let mut form = ParsedForm::default();
        form.fields.insert("title".to_string(), "Pothole".to_string());
        form.fields.insert("lat".to_string(), "12.5".to_string());
        form.fields.insert("lng".to_string(), "abc".to_string());

        let body = submit_body_from_form(&form);
        assert_eq!(body.title, "Pothole");
        assert_eq!(body.lat, Some(12.5));
        assert_eq!(body.lng, None);
    }
}
