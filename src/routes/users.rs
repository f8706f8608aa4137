//! User administration routes
//!
//! Admin-only account management under `/api/users`, plus the public
//! reporter leaderboard.

use std::sync::Arc;

use bson::{doc, DateTime, Document};
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::auth::{authenticate, require_admin};
use crate::db::schemas::{ConcernDoc, Role, UserDoc, CONCERN_COLLECTION, USER_COLLECTION};
use crate::routes::respond::{
    count_field, error_response, ok_data, ok_message, ok_message_data, parse_json_body,
    parse_object_id, parse_query, regex_escape, wrap, BoxBody,
};
use crate::server::AppState;
use crate::types::AppError;

const PAGE_SIZE: i64 = 10;

// ============================================================================
// Request / response shapes
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    page: Option<u32>,
    limit: Option<u32>,
    role: Option<String>,
    search: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    is_active: bool,
}

#[derive(Debug, Deserialize)]
struct RoleBody {
    #[serde(default)]
    role: String,
}

/// Account view for the admin surface; credentials and encrypted
/// identity fields are never echoed back
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AdminUserView {
    id: String,
    name: String,
    email: String,
    role: &'static str,
    avatar: String,
    is_active: bool,
    last_login: Option<String>,
    phone_number: Option<String>,
    address: Option<String>,
    created_at: Option<String>,
}

impl From<&UserDoc> for AdminUserView {
    fn from(user: &UserDoc) -> Self {
        Self {
            id: user._id.map(|id| id.to_hex()).unwrap_or_default(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role.as_str(),
            avatar: user.avatar.clone(),
            is_active: user.is_active,
            last_login: user
                .last_login
                .and_then(|ts| ts.try_to_rfc3339_string().ok()),
            phone_number: user.phone_number.clone(),
            address: user.address.clone(),
            created_at: user
                .metadata
                .created_at
                .and_then(|ts| ts.try_to_rfc3339_string().ok()),
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

pub async fn handle(req: Request<Incoming>, state: Arc<AppState>, rest: &str) -> Response<BoxBody> {
    let method = req.method().clone();
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    match (&method, segments.as_slice()) {
        (&Method::GET, ["leaderboard"]) => wrap(leaderboard(&state).await),
        (&Method::GET, ["stats"]) => wrap(stats(req, &state).await),
        (&Method::GET, []) => wrap(list(req, &state).await),
        (&Method::GET, [id]) => wrap(get_one(req, &state, id).await),
        (&Method::PATCH, [id, "status"]) => wrap(update_status(req, &state, id).await),
        (&Method::PATCH, [id, "role"]) => wrap(update_role(req, &state, id).await),
        (&Method::DELETE, [id]) => wrap(delete_user(req, &state, id).await),
        _ => error_response(&AppError::NotFound("Route not found".to_string())),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/users/leaderboard
///
/// Public: top reporters ranked by concern count, with resolved tally.
async fn leaderboard(state: &AppState) -> Result<Response<BoxBody>, AppError> {
    let concerns = state
        .mongo
        .collection::<ConcernDoc>(CONCERN_COLLECTION)
        .await?;

    let pipeline = vec![
        doc! { "$match": { "metadata.is_deleted": { "$ne": true } } },
        doc! { "$group": {
            "_id": "$created_by",
            "report_count": { "$sum": 1 },
            "resolved_count": {
                "$sum": { "$cond": [{ "$eq": ["$status", "Resolved"] }, 1, 0] }
            },
        }},
        doc! { "$sort": { "report_count": -1 } },
        doc! { "$limit": 10 },
        doc! { "$lookup": {
            "from": USER_COLLECTION,
            "localField": "_id",
            "foreignField": "_id",
            "as": "user",
        }},
        doc! { "$unwind": "$user" },
        doc! { "$project": {
            "_id": 1,
            "report_count": 1,
            "resolved_count": 1,
            "name": "$user.name",
            "avatar": "$user.avatar",
        }},
    ];

    let rows = concerns.aggregate(pipeline).await?;
    let leaderboard: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            json!({
                "_id": row.get_object_id("_id").map(|id| id.to_hex()).unwrap_or_default(),
                "reportCount": count_field(row, "report_count"),
                "resolvedCount": count_field(row, "resolved_count"),
                "name": row.get_str("name").unwrap_or_default(),
                "avatar": row.get_str("avatar").unwrap_or_default(),
            })
        })
        .collect();

    Ok(ok_data(leaderboard))
}

/// GET /api/users/stats
async fn stats(req: Request<Incoming>, state: &AppState) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    require_admin(&auth)?;

    let users = state.mongo.collection::<UserDoc>(USER_COLLECTION).await?;
    let total_users = users.count(doc! {}).await?;
    let total_citizens = users.count(doc! { "role": Role::Citizen.as_str() }).await?;
    let total_admins = users.count(doc! { "role": Role::Admin.as_str() }).await?;
    let active_users = users.count(doc! { "is_active": true }).await?;
    let inactive_users = users.count(doc! { "is_active": false }).await?;

    let week_ago = DateTime::from_millis(DateTime::now().timestamp_millis() - 7 * 24 * 3600 * 1000);
    let new_users_this_week = users
        .count(doc! { "metadata.created_at": { "$gte": week_ago } })
        .await?;

    Ok(ok_data(json!({ "stats": {
        "totalUsers": total_users,
        "totalCitizens": total_citizens,
        "totalAdmins": total_admins,
        "activeUsers": active_users,
        "inactiveUsers": inactive_users,
        "newUsersThisWeek": new_users_this_week,
    }})))
}

/// GET /api/users
async fn list(req: Request<Incoming>, state: &AppState) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    require_admin(&auth)?;

    let query: ListQuery = parse_query(&req);
    let page = u64::from(query.page.unwrap_or(1).max(1));
    let limit = i64::from(query.limit.unwrap_or(PAGE_SIZE as u32).clamp(1, 100));

    let mut filter = Document::new();
    if let Some(role) = query.role.as_deref().and_then(Role::parse) {
        filter.insert("role", role.as_str());
    }
    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = regex_escape(search.trim());
        filter.insert(
            "$or",
            vec![
                doc! { "name": { "$regex": &pattern, "$options": "i" } },
                doc! { "email": { "$regex": &pattern, "$options": "i" } },
            ],
        );
    }

    let users = state.mongo.collection::<UserDoc>(USER_COLLECTION).await?;
    let total = users.count(filter.clone()).await?;
    let found = users
        .find_page(
            filter,
            doc! { "metadata.created_at": -1 },
            (page - 1) * limit as u64,
            limit,
        )
        .await?;

    let views: Vec<AdminUserView> = found.iter().map(AdminUserView::from).collect();
    let total_pages = total.div_ceil(limit as u64);

    Ok(ok_data(json!({
        "users": views,
        "pagination": {
            "currentPage": page,
            "totalPages": total_pages,
            "totalUsers": total,
            "hasMore": (page * limit as u64) < total,
        },
    })))
}

/// GET /api/users/{id}
async fn get_one(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    require_admin(&auth)?;
    let id = parse_object_id(raw_id)?;

    let users = state.mongo.collection::<UserDoc>(USER_COLLECTION).await?;
    let user = users
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| AppError::NotFound("User not found.".to_string()))?;

    Ok(ok_data(json!({ "user": AdminUserView::from(&user) })))
}

/// PATCH /api/users/{id}/status
async fn update_status(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    require_admin(&auth)?;
    let id = parse_object_id(raw_id)?;
    let body: StatusBody = parse_json_body(req).await?;

    if id == auth.id {
        return Err(AppError::Validation(
            "You cannot change your own status.".to_string(),
        ));
    }

    let users = state.mongo.collection::<UserDoc>(USER_COLLECTION).await?;
    let updated = users
        .find_one_and_update(
            doc! { "_id": id },
            doc! { "$set": {
                "is_active": body.is_active,
                "metadata.updated_at": DateTime::now(),
            }},
        )
        .await?
        .ok_or_else(|| AppError::NotFound("User not found.".to_string()))?;

    info!(user = raw_id, active = body.is_active, "user status changed");

    let message = if body.is_active {
        "User has been activated."
    } else {
        "User has been deactivated."
    };
    Ok(ok_message_data(
        message,
        json!({ "user": AdminUserView::from(&updated) }),
    ))
}

/// PATCH /api/users/{id}/role
async fn update_role(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    require_admin(&auth)?;
    let id = parse_object_id(raw_id)?;
    let body: RoleBody = parse_json_body(req).await?;

    let role = Role::parse(&body.role).ok_or_else(|| {
        AppError::Validation("Invalid role. Must be either citizen or admin.".to_string())
    })?;

    if id == auth.id {
        return Err(AppError::Validation(
            "You cannot change your own role.".to_string(),
        ));
    }

    let users = state.mongo.collection::<UserDoc>(USER_COLLECTION).await?;
    let updated = users
        .find_one_and_update(
            doc! { "_id": id },
            doc! { "$set": {
                "role": role.as_str(),
                "metadata.updated_at": DateTime::now(),
            }},
        )
        .await?
        .ok_or_else(|| AppError::NotFound("User not found.".to_string()))?;

    info!(user = raw_id, role = role.as_str(), "user role changed");

    Ok(ok_message_data(
        &format!("User role updated to {}.", role.as_str()),
        json!({ "user": AdminUserView::from(&updated) }),
    ))
}

/// DELETE /api/users/{id}
///
/// Hard delete; admin cannot remove their own account through this
/// endpoint.
async fn delete_user(
    req: Request<Incoming>,
    state: &AppState,
    raw_id: &str,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    require_admin(&auth)?;
    let id = parse_object_id(raw_id)?;

    if id == auth.id {
        return Err(AppError::Validation(
            "You cannot delete your own account from here.".to_string(),
        ));
    }

    let users = state.mongo.collection::<UserDoc>(USER_COLLECTION).await?;
    users
        .find_one(doc! { "_id": id })
        .await?
        .ok_or_else(|| AppError::NotFound("User not found.".to_string()))?;

    users.delete_one(doc! { "_id": id }).await?;
    info!(user = raw_id, "user deleted");

    Ok(ok_message("User deleted successfully."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_view_hides_credentials() {
        let user = UserDoc::new(
            "Asha Rao".to_string(),
            "asha@example.org".to_string(),
            "argon2-hash".to_string(),
        );
        let view = AdminUserView::from(&user);
        let encoded = serde_json::to_string(&view).unwrap();
        assert!(!encoded.contains("argon2-hash"));
        assert!(encoded.contains("\"isActive\":true"));
        assert_eq!(view.role, "citizen");
    }
}
