//! Request authentication and role checks
//!
//! Resolves the calling user from the access token (Authorization header
//! or accessToken cookie), loads the account, and enforces the admin
//! gate where routes require it.

use bson::{doc, oid::ObjectId};
use hyper::HeaderMap;

use crate::auth::jwt::TokenSigner;
use crate::db::mongo::MongoClient;
use crate::db::schemas::{Role, UserDoc, USER_COLLECTION};
use crate::types::AppError;

/// Authenticated caller attached to a request
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: ObjectId,
    pub user: UserDoc,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.user.role == Role::Admin
    }
}

/// Extract a bearer token from the Authorization header
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("authorization")?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

/// Extract a named cookie from the Cookie header
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get("cookie")?.to_str().ok()?;
    for pair in value.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        if parts.next() == Some(name) {
            return parts.next().map(|v| v.to_string());
        }
    }
    None
}

/// Resolve the access token from header or cookie
fn access_token(headers: &HeaderMap) -> Option<String> {
    bearer_token(headers).or_else(|| cookie_value(headers, "accessToken"))
}

/// Authenticate a request, loading the caller's account
pub async fn authenticate(
    headers: &HeaderMap,
    signer: &TokenSigner,
    mongo: &MongoClient,
) -> Result<AuthUser, AppError> {
    let token = access_token(headers)
        .ok_or_else(|| AppError::Auth("Access denied. No token provided.".to_string()))?;

    let claims = signer
        .verify_access(&token)
        .map_err(|_| AppError::Auth("Invalid or expired token.".to_string()))?;

    let user_id = ObjectId::parse_str(&claims.sub)
        .map_err(|_| AppError::Auth("Invalid or expired token.".to_string()))?;

    let users = mongo.collection::<UserDoc>(USER_COLLECTION).await?;
    let user = users
        .find_one(doc! { "_id": user_id })
        .await?
        .ok_or_else(|| AppError::Auth("User not found.".to_string()))?;

    if !user.is_active {
        return Err(AppError::Auth("Account has been deactivated.".to_string()));
    }

    Ok(AuthUser { id: user_id, user })
}

/// Authenticate when a token is present; anonymous callers pass through
pub async fn authenticate_optional(
    headers: &HeaderMap,
    signer: &TokenSigner,
    mongo: &MongoClient,
) -> Option<AuthUser> {
    if access_token(headers).is_none() {
        return None;
    }
    authenticate(headers, signer, mongo).await.ok()
}

/// Reject non-admin callers
pub fn require_admin(user: &AuthUser) -> Result<(), AppError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "User role {} is not authorized to access this route.",
            user.user.role.as_str()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{HeaderValue, AUTHORIZATION, COOKIE};

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi".to_string()));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(bearer_token(&headers), None);

        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn cookie_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; accessToken=tok123; refreshToken=tok456"),
        );

        assert_eq!(
            cookie_value(&headers, "accessToken"),
            Some("tok123".to_string())
        );
        assert_eq!(
            cookie_value(&headers, "refreshToken"),
            Some("tok456".to_string())
        );
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn admin_gate() {
        let citizen = AuthUser {
            id: ObjectId::new(),
            user: UserDoc {
                role: Role::Citizen,
                ..Default::default()
            },
        };
        let admin = AuthUser {
            id: ObjectId::new(),
            user: UserDoc {
                role: Role::Admin,
                ..Default::default()
            },
        };

        assert!(require_admin(&admin).is_ok());
        let err = require_admin(&citizen).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
}
