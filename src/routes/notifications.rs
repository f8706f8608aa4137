//! Notification routes
//!
//! Per-user notification inbox, served under both `/api/notifications`
//! and its `/api/user-alerts` alias. Recipients only ever see their own
//! rows; the recipient filter rides along on every query.

use std::sync::Arc;

use bson::{doc, DateTime};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use serde_json::json;

use crate::auth::authenticate;
use crate::db::schemas::{NotificationDoc, NotificationType, NOTIFICATION_COLLECTION};
use crate::routes::respond::{
    error_response, json_response, ok_data, ok_message, parse_object_id, rfc3339, wrap, BoxBody,
};
use crate::server::AppState;
use crate::types::AppError;

const INBOX_LIMIT: i64 = 50;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationView {
    id: String,
    recipient: String,
    sender: String,
    #[serde(rename = "type")]
    notification_type: NotificationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    concern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    idea: Option<String>,
    message: String,
    is_read: bool,
    created_at: Option<String>,
}

impl From<&NotificationDoc> for NotificationView {
    fn from(notification: &NotificationDoc) -> Self {
        Self {
            id: notification._id.map(|id| id.to_hex()).unwrap_or_default(),
            recipient: notification.recipient.to_hex(),
            sender: notification.sender.to_hex(),
            notification_type: notification.notification_type,
            concern: notification.concern.map(|id| id.to_hex()),
            policy: notification.policy.map(|id| id.to_hex()),
            idea: notification.idea.map(|id| id.to_hex()),
            message: notification.message.clone(),
            is_read: notification.is_read,
            created_at: notification.metadata.created_at.and_then(rfc3339),
        }
    }
}

pub async fn handle(req: Request<Incoming>, state: Arc<AppState>, rest: &str) -> Response<BoxBody> {
    let method = req.method().clone();
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    match (&method, segments.as_slice()) {
        (&Method::GET, []) => wrap(inbox(req, &state).await),
        (&Method::PATCH, ["read-all"]) => wrap(mark_all_read(req, &state).await),
        (&Method::PATCH, [id, "read"]) => wrap(mark_read(req, &state, id).await),
        _ => error_response(&AppError::NotFound("Route not found".to_string())),
    }
}

/// GET /api/notifications
async fn inbox(req: Request<Incoming>, state: &AppState) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;

    let notifications = state
        .mongo
        .collection::<NotificationDoc>(NOTIFICATION_COLLECTION)
        .await?;
    let found = notifications
        .find_page(
            doc! { "recipient": auth.id },
            doc! { "metadata.created_at": -1 },
            0,
            INBOX_LIMIT,
        )
        .await?;
    let views: Vec<NotificationView> = found.iter().map(NotificationView::from).collect();

    Ok(json_response(
        StatusCode::OK,
        &json!({
            "success": true,
            "count": views.len(),
            "data": views,
        }),
    ))
}

/// PATCH /api/notifications/read-all
async fn mark_all_read(
    req: Request<Incoming>,
    state: &AppState,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;

    let notifications = state
        .mongo
        .collection::<NotificationDoc>(NOTIFICATION_COLLECTION)
        .await?;
    notifications
        .update_many(
            doc! { "recipient": auth.id, "is_read": false },
            doc! { "$set": {
                "is_read": true,
                "metadata.updated_at": DateTime::now(),
            }},
        )
        .await?;

    Ok(ok_message("All notifications marked as read"))
}

/// PATCH /api/notifications/{id}/read
async fn mark_read(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    let id = parse_object_id(raw_id)?;

    let notifications = state
        .mongo
        .collection::<NotificationDoc>(NOTIFICATION_COLLECTION)
        .await?;
    // Recipient guard: a foreign id reads as missing
    let updated = notifications
        .find_one_and_update(
            doc! { "_id": id, "recipient": auth.id },
            doc! { "$set": {
                "is_read": true,
                "metadata.updated_at": DateTime::now(),
            }},
        )
        .await?
        .ok_or_else(|| AppError::NotFound("Notification not found".to_string()))?;

    Ok(ok_data(json!(NotificationView::from(&updated))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;

    #[test]
    fn view_uses_wire_field_names() {
        let notification = NotificationDoc::new(
            ObjectId::new(),
            ObjectId::new(),
            NotificationType::StatusUpdate,
            "The status of your concern \"Pothole\" has been updated to \"Resolved\".".to_string(),
        )
        .about_concern(ObjectId::new());

        let encoded = serde_json::to_string(&NotificationView::from(&notification)).unwrap();
        assert!(encoded.contains("\"type\":\"StatusUpdate\""));
        assert!(encoded.contains("\"isRead\":false"));
        assert!(encoded.contains("\"concern\":"));
        assert!(!encoded.contains("\"policy\""));
    }
}
