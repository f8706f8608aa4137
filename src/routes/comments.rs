//! Comment routes
//!
//! Top-level comment collection under `/api/comments`, keyed by the
//! concern being discussed. All routes require a login; deletion is
//! restricted to the author or an admin.

use std::collections::HashMap;
use std::sync::Arc;

use bson::{doc, oid::ObjectId};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::authenticate;
use crate::db::schemas::{CommentDoc, ConcernDoc, COMMENT_COLLECTION, CONCERN_COLLECTION};
use crate::routes::respond::{
    error_response, json_response, load_user_refs, parse_json_body, parse_object_id, rfc3339,
    wrap, BoxBody, UserRef,
};
use crate::server::AppState;
use crate::types::AppError;

#[derive(Debug, Deserialize)]
struct CommentBody {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommentItemView {
    id: String,
    text: String,
    concern: String,
    user: Option<UserRef>,
    created_at: Option<String>,
}

impl CommentItemView {
    fn build(comment: &CommentDoc, users: &HashMap<ObjectId, UserRef>) -> Self {
        Self {
            id: comment._id.map(|id| id.to_hex()).unwrap_or_default(),
            text: comment.text.clone(),
            concern: comment.concern.to_hex(),
            user: users.get(&comment.user).cloned(),
            created_at: comment.metadata.created_at.and_then(rfc3339),
        }
    }
}

pub async fn handle(req: Request<Incoming>, state: Arc<AppState>, rest: &str) -> Response<BoxBody> {
    let method = req.method().clone();
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    match (&method, segments.as_slice()) {
        (&Method::GET, [concern_id]) => wrap(list(req, &state, concern_id).await),
        (&Method::POST, [concern_id]) => wrap(add(req, &state, concern_id).await),
        (&Method::DELETE, [id]) => wrap(delete(req, &state, id).await),
        _ => error_response(&AppError::NotFound("Route not found".to_string())),
    }
}

/// GET /api/comments/{concernId}
async fn list(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    let concern_id = parse_object_id(raw_id)?;

    let comments = state.mongo.collection::<CommentDoc>(COMMENT_COLLECTION).await?;
    let found = comments
        .find_page(
            doc! { "concern": concern_id },
            doc! { "metadata.created_at": -1 },
            0,
            1000,
        )
        .await?;

    let author_ids: Vec<ObjectId> = found.iter().map(|comment| comment.user).collect();
    let users = load_user_refs(&state.mongo, author_ids).await?;
    let views: Vec<CommentItemView> = found
        .iter()
        .map(|comment| CommentItemView::build(comment, &users))
        .collect();

    Ok(json_response(
        StatusCode::OK,
        &json!({
            "success": true,
            "count": views.len(),
            "data": views,
        }),
    ))
}

/// POST /api/comments/{concernId}
async fn add(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    let concern_id = parse_object_id(raw_id)?;
    let body: CommentBody = parse_json_body(req).await?;

    let text = body.text.trim();
    if text.is_empty() {
        return Err(AppError::Validation(
            "Please provide comment text".to_string(),
        ));
    }
    if text.chars().count() > 500 {
        return Err(AppError::Validation(
            "Comment cannot exceed 500 characters".to_string(),
        ));
    }

    let concerns = state.mongo.collection::<ConcernDoc>(CONCERN_COLLECTION).await?;
    concerns
        .find_one(doc! { "_id": concern_id })
        .await?
        .ok_or_else(|| AppError::NotFound("Concern not found".to_string()))?;

    let comments = state.mongo.collection::<CommentDoc>(COMMENT_COLLECTION).await?;
    let comment = CommentDoc {
        text: text.to_string(),
        concern: concern_id,
        user: auth.id,
        ..Default::default()
    };
    let id = comments.insert_one(comment).await?;
    let comment = comments
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| AppError::Internal("Inserted comment vanished".to_string()))?;

    let mut users = HashMap::new();
    users.insert(auth.id, UserRef::from(&auth.user));
    let view = CommentItemView::build(&comment, &users);

    Ok(json_response(
        StatusCode::CREATED,
        &json!({ "success": true, "data": view }),
    ))
}

/// DELETE /api/comments/{id}
async fn delete(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    let id = parse_object_id(raw_id)?;

    let comments = state.mongo.collection::<CommentDoc>(COMMENT_COLLECTION).await?;
    let comment = comments
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;

    if comment.user != auth.id && !auth.is_admin() {
        return Err(AppError::Forbidden(
            "Not authorized to delete this comment".to_string(),
        ));
    }

    comments.delete_one(doc! { "_id": id }).await?;

    Ok(json_response(
        StatusCode::OK,
        &json!({ "success": true, "data": {} }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_exposes_hex_ids_and_author() {
        let author = ObjectId::new();
        let comment = CommentDoc {
            _id: Some(ObjectId::new()),
            text: "This needs fixing before monsoon".to_string(),
            concern: ObjectId::new(),
            user: author,
            ..Default::default()
        };
        let mut users = HashMap::new();
        users.insert(
            author,
            UserRef {
                id: author.to_hex(),
                name: "Asha".to_string(),
                email: "asha@example.com".to_string(),
                avatar: String::new(),
            },
        );

        let view = CommentItemView::build(&comment, &users);
        assert_eq!(view.concern.len(), 24);
        assert_eq!(view.user.as_ref().map(|u| u.name.as_str()), Some("Asha"));
    }
}
