//! Authentication routes
//!
//! Registration, login, refresh-token rotation, and profile management
//! under `/api/auth`. The refresh token travels as an http-only cookie
//! and is persisted on the user document so a rotation invalidates the
//! prior value.

use std::sync::Arc;

use bson::{doc, oid::ObjectId, DateTime, Document};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, SET_COOKIE};
use hyper::{Method, Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::auth::guard::{authenticate, cookie_value};
use crate::auth::{hash_password, verify_password, FieldCipher};
use crate::db::schemas::{Role, UserDoc, USER_COLLECTION};
use crate::routes::respond::{
    created, error_response, ok_data, ok_message, ok_message_data, parse_json_body, wrap, BoxBody,
};
use crate::server::AppState;
use crate::types::AppError;

// ============================================================================
// Request / response shapes
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody {
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileBody {
    name: Option<String>,
    avatar: Option<String>,
    aadhar_number: Option<String>,
    pan_number: Option<String>,
    phone_number: Option<String>,
    address: Option<String>,
}

/// Public view of a user account, identity fields decrypted
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: &'static str,
    pub avatar: String,
    pub is_active: bool,
    pub aadhar_number: Option<String>,
    pub pan_number: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub created_at: Option<String>,
}

impl ProfileView {
    pub fn from_user(user: &UserDoc, cipher: &FieldCipher) -> Self {
        Self {
            id: user._id.map(|id| id.to_hex()).unwrap_or_default(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role.as_str(),
            avatar: user.avatar.clone(),
            is_active: user.is_active,
            aadhar_number: user
                .aadhar_number
                .as_deref()
                .and_then(|stored| cipher.decrypt(stored).ok()),
            pan_number: user
                .pan_number
                .as_deref()
                .and_then(|stored| cipher.decrypt(stored).ok()),
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
    match (&method, rest) {
        (&Method::POST, "/register") => wrap(register(req, &state).await),
        (&Method::POST, "/login") => wrap(login(req, &state).await),
        (&Method::POST, "/refresh-token") => wrap(refresh_token(req, &state).await),
        (&Method::POST, "/logout") => wrap(logout(req, &state).await),
        (&Method::GET, "/profile") => wrap(get_profile(req, &state).await),
        (&Method::PUT, "/profile") => wrap(update_profile(req, &state).await),
        _ => error_response(&AppError::NotFound("Route not found".to_string())),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/auth/register
async fn register(
    req: Request<Incoming>,
    state: &AppState,
) -> Result<Response<BoxBody>, AppError> {
    let body: RegisterBody = parse_json_body(req).await?;

    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Name is required".to_string()));
    }
    if !(2..=50).contains(&name.chars().count()) {
        return Err(AppError::Validation(
            "Name must be 2-50 characters".to_string(),
        ));
    }

    let email = body.email.trim().to_lowercase();
    if email.is_empty() {
        return Err(AppError::Validation("Email is required".to_string()));
    }
    if !valid_email(&email) {
        return Err(AppError::Validation(
            "Please enter a valid email".to_string(),
        ));
    }

    let password = body.password.trim();
    if password.is_empty() {
        return Err(AppError::Validation("Password is required".to_string()));
    }
    if password.chars().count() < 6 {
        return Err(AppError::Validation(
            "Password must be at least 6 characters".to_string(),
        ));
    }
    if !strong_password(password) {
        return Err(AppError::Validation(
            "Password must contain uppercase, lowercase, and number".to_string(),
        ));
    }

    let role = match body.role.as_deref() {
        None | Some("") => Role::Citizen,
        Some(raw) => Role::parse(raw).ok_or_else(|| {
            AppError::Validation("Role must be either citizen or admin".to_string())
        })?,
    };

    let users = state.mongo.collection::<UserDoc>(USER_COLLECTION).await?;
    if users.find_one(doc! { "email": &email }).await?.is_some() {
        return Err(AppError::Duplicate(
            "An account with this email already exists.".to_string(),
        ));
    }

    let mut user = UserDoc::new(name.to_string(), email, hash_password(password)?);
    user.role = role;

    // Unique email index may still fire between the pre-check and here
    let id = users.insert_one(user).await.map_err(duplicate_email)?;

    let access = state.tokens.issue_access(&id.to_hex(), role.as_str())?;
    let refresh = state.tokens.issue_refresh(&id.to_hex(), role.as_str())?;
    let user = users
        .find_one_and_update(
            doc! { "_id": id },
            doc! { "$set": { "refresh_token": &refresh } },
        )
        .await?
        .ok_or_else(|| AppError::Internal("Registered user vanished".to_string()))?;

    info!(user = %id.to_hex(), role = role.as_str(), "user registered");

    let view = ProfileView::from_user(&user, &state.cipher);
    let response = created(
        "Registration successful! Welcome to CivicConnect.",
        json!({ "user": view, "accessToken": access }),
    );
    Ok(with_cookie(
        response,
        &refresh_cookie(
            &refresh,
            state.args.refresh_token_ttl_seconds,
            !state.args.dev_mode,
        ),
    ))
}

/// POST /api/auth/login
async fn login(req: Request<Incoming>, state: &AppState) -> Result<Response<BoxBody>, AppError> {
    let body: LoginBody = parse_json_body(req).await?;

    let email = body.email.trim().to_lowercase();
    if email.is_empty() {
        return Err(AppError::Validation("Email is required".to_string()));
    }
    if !valid_email(&email) {
        return Err(AppError::Validation(
            "Please enter a valid email".to_string(),
        ));
    }
    let password = body.password.trim();
    if password.is_empty() {
        return Err(AppError::Validation("Password is required".to_string()));
    }

    let users = state.mongo.collection::<UserDoc>(USER_COLLECTION).await?;
    let user = users
        .find_one(doc! { "email": &email })
        .await?
        .ok_or_else(|| AppError::Auth("Invalid email or password.".to_string()))?;

    if !user.is_active {
        return Err(AppError::Auth(
            "Your account has been deactivated. Please contact support.".to_string(),
        ));
    }
    if !verify_password(password, &user.password_hash)? {
        return Err(AppError::Auth("Invalid email or password.".to_string()));
    }

    let id = user
        ._id
        .ok_or_else(|| AppError::Internal("Stored user has no id".to_string()))?;
    let access = state.tokens.issue_access(&id.to_hex(), user.role.as_str())?;
    let refresh = state.tokens.issue_refresh(&id.to_hex(), user.role.as_str())?;
    users
        .update_one(
            doc! { "_id": id },
            doc! { "$set": { "refresh_token": &refresh, "last_login": DateTime::now() } },
        )
        .await?;

    let view = ProfileView::from_user(&user, &state.cipher);
    let response = ok_message_data(
        &format!("Welcome back, {}!", user.name),
        json!({ "user": view, "accessToken": access }),
    );
    Ok(with_cookie(
        response,
        &refresh_cookie(
            &refresh,
            state.args.refresh_token_ttl_seconds,
            !state.args.dev_mode,
        ),
    ))
}

/// POST /api/auth/refresh-token
///
/// Rotates both tokens; the stored refresh value must match the one
/// presented, so a superseded token is rejected even if its signature
/// is still valid.
async fn refresh_token(
    req: Request<Incoming>,
    state: &AppState,
) -> Result<Response<BoxBody>, AppError> {
    let cookie_token = cookie_value(req.headers(), "refreshToken");
    let token = match cookie_token {
        Some(token) => Some(token),
        None => parse_json_body::<RefreshBody>(req)
            .await
            .ok()
            .and_then(|body| body.refresh_token),
    }
    .ok_or_else(|| AppError::Auth("Refresh token not found.".to_string()))?;

    let claims = state
        .tokens
        .verify_refresh(&token)
        .map_err(|_| AppError::Auth("Invalid or expired refresh token.".to_string()))?;
    let user_id = ObjectId::parse_str(&claims.sub)
        .map_err(|_| AppError::Auth("Invalid refresh token.".to_string()))?;

    let users = state.mongo.collection::<UserDoc>(USER_COLLECTION).await?;
    let user = users
        .find_one(doc! { "_id": user_id })
        .await?
        .ok_or_else(|| AppError::Auth("Invalid refresh token.".to_string()))?;
    if user.refresh_token.as_deref() != Some(token.as_str()) {
        return Err(AppError::Auth("Invalid refresh token.".to_string()));
    }

    let access = state
        .tokens
        .issue_access(&user_id.to_hex(), user.role.as_str())?;
    let refresh = state
        .tokens
        .issue_refresh(&user_id.to_hex(), user.role.as_str())?;
    users
        .update_one(
            doc! { "_id": user_id },
            doc! { "$set": { "refresh_token": &refresh } },
        )
        .await?;

    let response = ok_data(json!({ "accessToken": access }));
    Ok(with_cookie(
        response,
        &refresh_cookie(
            &refresh,
            state.args.refresh_token_ttl_seconds,
            !state.args.dev_mode,
        ),
    ))
}

/// POST /api/auth/logout
async fn logout(req: Request<Incoming>, state: &AppState) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;

    let users = state.mongo.collection::<UserDoc>(USER_COLLECTION).await?;
    users
        .update_one(
            doc! { "_id": auth.id },
            doc! { "$unset": { "refresh_token": "" } },
        )
        .await?;

    let response = ok_message("Logged out successfully.");
    Ok(with_cookie(response, &clear_refresh_cookie()))
}

/// GET /api/auth/profile
async fn get_profile(
    req: Request<Incoming>,
    state: &AppState,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    let view = ProfileView::from_user(&auth.user, &state.cipher);
    Ok(ok_data(json!({ "user": view })))
}

/// PUT /api/auth/profile
async fn update_profile(
    req: Request<Incoming>,
    state: &AppState,
) -> Result<Response<BoxBody>, AppError> {
    let auth = authenticate(req.headers(), &state.tokens, &state.mongo).await?;
    let body: UpdateProfileBody = parse_json_body(req).await?;

    let mut set = Document::new();

    if let Some(name) = body.name.as_deref() {
        let name = name.trim();
        if name.chars().count() < 2 {
            return Err(AppError::Validation(
                "Name must be at least 2 characters".to_string(),
            ));
        }
        if name.chars().count() > 50 {
            return Err(AppError::Validation(
                "Name cannot exceed 50 characters".to_string(),
            ));
        }
        set.insert("name", name);
    }
    if let Some(avatar) = body.avatar.as_deref() {
        set.insert("avatar", avatar);
    }
    if let Some(phone) = body.phone_number.as_deref() {
        let phone = phone.trim();
        if phone.len() != 10 || !phone.chars().all(|c| c.is_ascii_digit()) {
            return Err(AppError::Validation(
                "Please enter a valid 10-digit mobile number".to_string(),
            ));
        }
        set.insert("phone_number", phone);
    }
    if let Some(address) = body.address.as_deref() {
        let address = address.trim();
        if address.chars().count() > 200 {
            return Err(AppError::Validation(
                "Address cannot exceed 200 characters".to_string(),
            ));
        }
        set.insert("address", address);
    }
    if let Some(aadhar) = body.aadhar_number.as_deref() {
        set.insert("aadhar_number", state.cipher.encrypt(aadhar)?);
    }
    if let Some(pan) = body.pan_number.as_deref() {
        set.insert("pan_number", state.cipher.encrypt(pan)?);
    }

    set.insert("metadata.updated_at", DateTime::now());

    let users = state.mongo.collection::<UserDoc>(USER_COLLECTION).await?;
    let updated = users
        .find_one_and_update(doc! { "_id": auth.id }, doc! { "$set": set })
        .await?
        .ok_or_else(|| AppError::NotFound("User not found.".to_string()))?;

    let view = ProfileView::from_user(&updated, &state.cipher);
    Ok(ok_message_data(
        "Profile updated successfully.",
        json!({ "user": view }),
    ))
}

// ============================================================================
// Helpers
// ============================================================================

/// Light structural email check mirroring the classic pattern: word runs
/// joined by single dots or dashes, and a 2-3 character top-level domain.
fn valid_email(email: &str) -> bool {
    fn word_run(s: &str) -> bool {
        !s.is_empty()
            && s.split(['.', '-']).all(|part| {
                !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            })
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    word_run(local)
        && word_run(host)
        && (2..=3).contains(&tld.len())
        && tld.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn strong_password(password: &str) -> bool {
    password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
}

/// Map a unique-index collision on email to a 409
fn duplicate_email(err: AppError) -> AppError {
    match err {
        AppError::Database(detail) if detail.contains("E11000") => {
            AppError::Duplicate("An account with this email already exists.".to_string())
        }
        other => other,
    }
}

fn refresh_cookie(token: &str, max_age_seconds: u64, secure: bool) -> String {
    let mut cookie = format!(
        "refreshToken={token}; Max-Age={max_age_seconds}; Path=/; HttpOnly; SameSite=Strict"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn clear_refresh_cookie() -> String {
    "refreshToken=; Max-Age=0; Path=/; HttpOnly; SameSite=Strict".to_string()
}

fn with_cookie(mut response: Response<BoxBody>, cookie: &str) -> Response<BoxBody> {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().append(SET_COOKIE, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(valid_email("asha.rao@example.com"));
        assert!(valid_email("dev_user@mail.example.in"));
        assert!(!valid_email("no-at-sign.example.com"));
        assert!(!valid_email("user@nodot"));
        assert!(!valid_email("user@example.toolong"));
        assert!(!valid_email("user@@example.com"));
        assert!(!valid_email("user name@example.com"));
        assert!(!valid_email(".user@example.com"));
    }

    #[test]
    fn password_class_check() {
        assert!(strong_password("Secret1"));
        assert!(!strong_password("alllower1"));
        assert!(!strong_password("ALLUPPER1"));
        assert!(!strong_password("NoDigits"));
    }

    #[test]
    fn refresh_cookie_shape() {
        let cookie = refresh_cookie("tok", 604800, false);
        assert!(cookie.starts_with("refreshToken=tok; Max-Age=604800"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(!cookie.contains("Secure"));

        let secure = refresh_cookie("tok", 604800, true);
        assert!(secure.ends_with("; Secure"));

        assert!(clear_refresh_cookie().contains("Max-Age=0"));
    }

    #[test]
    fn duplicate_key_maps_to_conflict() {
        let err = duplicate_email(AppError::Database(
            "E11000 duplicate key error collection".to_string(),
        ));
        assert!(matches!(err, AppError::Duplicate(_)));

        let passthrough = duplicate_email(AppError::Database("connection reset".to_string()));
        assert!(matches!(passthrough, AppError::Database(_)));
    }
}
