//! Shared response and request plumbing for the route handlers
//!
//! Every endpoint speaks the same JSON envelope:
//! `{ "success": bool, "message"?: string, "data"?: ... }`.

use std::collections::HashMap;

use bson::{doc, oid::ObjectId};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::db::mongo::MongoClient;
use crate::db::schemas::{UserDoc, USER_COLLECTION};
use crate::types::AppError;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// JSON body cap for non-upload endpoints
const MAX_JSON_BODY: usize = 64 * 1024;

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, PATCH, DELETE, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .body(full_body(json))
        .unwrap()
}

/// 200 with a data payload
pub fn ok_data<T: Serialize>(data: T) -> Response<BoxBody> {
    json_response(StatusCode::OK, &json!({ "success": true, "data": data }))
}

/// 200 with a message and a data payload
pub fn ok_message_data<T: Serialize>(message: &str, data: T) -> Response<BoxBody> {
    json_response(
        StatusCode::OK,
        &json!({ "success": true, "message": message, "data": data }),
    )
}

/// 200 with only a message
pub fn ok_message(message: &str) -> Response<BoxBody> {
    json_response(
        StatusCode::OK,
        &json!({ "success": true, "message": message }),
    )
}

/// 201 with a message and a data payload
pub fn created<T: Serialize>(message: &str, data: T) -> Response<BoxBody> {
    json_response(
        StatusCode::CREATED,
        &json!({ "success": true, "message": message, "data": data }),
    )
}

/// Map a domain error onto the envelope and status code
pub fn error_response(err: &AppError) -> Response<BoxBody> {
    let status = err.status();
    if status.is_server_error() {
        error!(error = %err, "request failed");
    }
    json_response(
        status,
        &json!({ "success": false, "message": err.public_message() }),
    )
}

/// Collapse a handler result into a response
pub fn wrap(result: Result<Response<BoxBody>, AppError>) -> Response<BoxBody> {
    result.unwrap_or_else(|err| error_response(&err))
}

pub fn cors_preflight() -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, PATCH, DELETE, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .header("Access-Control-Max-Age", "86400")
        .body(empty_body())
        .unwrap()
}

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Read and deserialize a JSON request body
pub async fn parse_json_body<T: DeserializeOwned>(
    req: Request<hyper::body::Incoming>,
) -> Result<T, AppError> {
    let body = req
        .collect()
        .await
        .map_err(|e| AppError::Http(format!("Failed to read body: {}", e)))?;

    let bytes = body.to_bytes();
    if bytes.len() > MAX_JSON_BODY {
        return Err(AppError::Http("Request body too large".into()));
    }

    serde_json::from_slice(&bytes).map_err(|e| AppError::Validation(format!("Invalid JSON: {}", e)))
}

/// Read a raw body up to `cap` bytes (multipart uploads)
pub async fn read_body_bytes(
    req: Request<hyper::body::Incoming>,
    cap: usize,
) -> Result<Bytes, AppError> {
    let body = req
        .collect()
        .await
        .map_err(|e| AppError::Http(format!("Failed to read body: {}", e)))?;

    let bytes = body.to_bytes();
    if bytes.len() > cap {
        return Err(AppError::Validation(
            "File too large. Maximum size is 10MB.".into(),
        ));
    }
    Ok(bytes)
}

/// Parse the query string into a typed struct, falling back to defaults
pub fn parse_query<T: DeserializeOwned + Default>(req: &Request<hyper::body::Incoming>) -> T {
    req.uri()
        .query()
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default()
}

/// Parse a path segment as an ObjectId; a malformed id can never match
/// a resource
pub fn parse_object_id(raw: &str) -> Result<ObjectId, AppError> {
    ObjectId::parse_str(raw).map_err(|_| AppError::NotFound("Resource not found".to_string()))
}

/// Escape a user-supplied search term before embedding it in a $regex
/// filter
pub fn regex_escape(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Read an aggregation counter; $sum emits an i32 until the count
/// overflows it
pub fn count_field(row: &bson::Document, key: &str) -> i64 {
    row.get_i32(key)
        .map(i64::from)
        .or_else(|_| row.get_i64(key))
        .unwrap_or(0)
}

/// Format a stored timestamp for a JSON response
pub fn rfc3339(ts: bson::DateTime) -> Option<String> {
    ts.try_to_rfc3339_string().ok()
}

/// Parse a display string into a serde enum, honoring its renames
pub fn parse_enum<T: DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_string())).ok()
}

/// Parse an RFC 3339 timestamp from a request field
pub fn parse_rfc3339(raw: &str) -> Option<bson::DateTime> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| bson::DateTime::from_chrono(dt.with_timezone(&chrono::Utc)))
}

/// Referenced user as embedded in list/detail responses
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar: String,
}

impl From<&UserDoc> for UserRef {
    fn from(user: &UserDoc) -> Self {
        Self {
            id: user._id.map(|id| id.to_hex()).unwrap_or_default(),
            name: user.name.clone(),
            email: user.email.clone(),
            avatar: user.avatar.clone(),
        }
    }
}

/// Batched lookup of referenced users, keyed by id
pub async fn load_user_refs(
    mongo: &MongoClient,
    ids: Vec<ObjectId>,
) -> Result<HashMap<ObjectId, UserRef>, AppError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let users = mongo.collection::<UserDoc>(USER_COLLECTION).await?;
    let found = users.find_many(doc! { "_id": { "$in": ids } }).await?;
    Ok(found
        .iter()
        .filter_map(|user| user._id.map(|id| (id, UserRef::from(user))))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_id_maps_to_not_found() {
        let err = parse_object_id("not-an-id").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(parse_object_id(&ObjectId::new().to_hex()).is_ok());
    }

    #[test]
    fn rfc3339_parsing() {
        assert!(parse_rfc3339("2026-03-01T10:00:00Z").is_some());
        assert!(parse_rfc3339("tomorrow").is_none());
    }

    #[test]
    fn regex_metacharacters_escaped() {
        assert_eq!(regex_escape("road (main)"), "road \\(main\\)");
        assert_eq!(regex_escape("a.b*c"), "a\\.b\\*c");
        assert_eq!(regex_escape("plain"), "plain");
    }

    #[test]
    fn count_field_handles_both_int_widths() {
        let row = doc! { "small": 4_i32, "large": 5_000_000_000_i64 };
        assert_eq!(count_field(&row, "small"), 4);
        assert_eq!(count_field(&row, "large"), 5_000_000_000);
        assert_eq!(count_field(&row, "missing"), 0);
    }

    #[test]
    fn stored_enum_strings_parse() {
        use crate::db::schemas::IdeaStatus;
        assert_eq!(
            parse_enum::<IdeaStatus>("Under Review"),
            Some(IdeaStatus::UnderReview)
        );
        assert_eq!(parse_enum::<IdeaStatus>("Sideways"), None);
    }

    #[test]
    fn user_ref_from_doc() {
        let user = UserDoc::new(
            "Asha Rao".to_string(),
            "asha@example.org".to_string(),
            "hash".to_string(),
        );
        let reference = UserRef::from(&user);
        assert_eq!(reference.name, "Asha Rao");
        assert_eq!(reference.id, "");
    }
}
