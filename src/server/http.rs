//! HTTP server implementation
//!
//! hyper http1 with TokioIo, one spawned task per connection. Requests are
//! dispatched to per-resource route modules mounted under /api, with
//! fixed-window rate limiting in front of everything except the infra
//! probes and alert polling.

use bytes::Bytes;
use dashmap::DashMap;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::ai::LanguageModel;
use crate::auth::{FieldCipher, TokenSigner};
use crate::config::Args;
use crate::db::MongoClient;
use crate::routes::respond::{full_body, json_response};
use crate::routes::{self, error_response, BoxBody};
use crate::services::UploadStore;
use crate::types::AppError;

/// Fixed-window request counter keyed by client IP.
pub struct RateLimiter {
    clients: DashMap<IpAddr, Window>,
    window: Duration,
    max_requests: u32,
}

struct Window {
    started: Instant,
    hits: u32,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            clients: DashMap::new(),
            window,
            max_requests,
        }
    }

    /// Counts a request and reports whether the client exceeded its window.
    pub fn over_limit(&self, client: IpAddr) -> bool {
        let mut entry = self.clients.entry(client).or_insert_with(|| Window {
            started: Instant::now(),
            hits: 0,
        });
        if entry.started.elapsed() >= self.window {
            entry.started = Instant::now();
            entry.hits = 0;
        }
        entry.hits += 1;
        entry.hits > self.max_requests
    }

    /// Drops counters whose window has already passed.
    pub fn sweep(&self) {
        self.clients
            .retain(|_, window| window.started.elapsed() < self.window);
    }
}

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub mongo: MongoClient,
    /// Signs and verifies access/refresh JWTs
    pub tokens: TokenSigner,
    /// Encrypts citizen PII fields at rest
    pub cipher: FieldCipher,
    /// Language-model delegate behind the AI features
    pub delegate: Arc<dyn LanguageModel>,
    /// Filesystem store for concern images and policy documents
    pub uploads: UploadStore,
    /// Global fixed-window limiter
    pub api_limiter: RateLimiter,
    /// Stricter limiter on /api/auth
    pub auth_limiter: RateLimiter,
    /// Process start, for uptime reporting
    pub started_at: Instant,
}

impl AppState {
    pub fn new(args: Args, mongo: MongoClient, delegate: Arc<dyn LanguageModel>) -> Self {
        let tokens = TokenSigner::new(
            &args.access_secret(),
            &args.refresh_secret(),
            args.access_token_ttl_seconds,
            args.refresh_token_ttl_seconds,
        );
        let cipher = FieldCipher::new(&args.pii_key_secret());
        let uploads = UploadStore::new(&args.uploads_dir);
        let window = Duration::from_secs(args.rate_limit_window_seconds);
        let api_limiter = RateLimiter::new(window, args.rate_limit_max_requests);
        let auth_limiter = RateLimiter::new(window, args.auth_rate_limit_max_requests);

        Self {
            args,
            mongo,
            tokens,
            cipher,
            delegate,
            uploads,
            api_limiter,
            auth_limiter,
            started_at: Instant::now(),
        }
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<(), AppError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "CivicConnect listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - built-in fallback secrets in use");
    }

    info!(
        "Rate limiting enabled ({} requests per {}s, {} on /api/auth)",
        state.args.rate_limit_max_requests,
        state.args.rate_limit_window_seconds,
        state.args.auth_rate_limit_max_requests
    );
    spawn_limiter_sweep_task(Arc::clone(&state));

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Periodically drop rate-limit counters whose window has passed.
fn spawn_limiter_sweep_task(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            state.api_limiter.sweep();
            state.auth_limiter.sweep();
        }
    });
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    // CORS preflight
    if method == Method::OPTIONS {
        return Ok(routes::cors_preflight());
    }

    // Infra probes answer ahead of the limiters.
    match (&method, path.as_str()) {
        (&Method::GET, "/health") | (&Method::GET, "/healthz") => {
            return Ok(to_boxed(routes::health_check(state).await));
        }
        (&Method::GET, "/ready") | (&Method::GET, "/readyz") => {
            return Ok(to_boxed(routes::readiness_check(state).await));
        }
        (&Method::GET, "/version") => {
            return Ok(to_boxed(routes::version_info()));
        }
        _ => {}
    }

    // Alert polling is mounted ahead of the global limiter.
    if let Some(rest) = strip_mount(&path, "/api/user-alerts") {
        return Ok(routes::notifications::handle(req, state, rest).await);
    }

    if state.api_limiter.over_limit(addr.ip()) {
        return Ok(too_many_requests(
            "Too many requests, please try again later.",
        ));
    }

    // /api/auth counts against both the global and the auth limiter.
    if let Some(rest) = strip_mount(&path, "/api/auth") {
        if state.auth_limiter.over_limit(addr.ip()) {
            return Ok(too_many_requests(
                "Too many authentication attempts, please try again later.",
            ));
        }
        return Ok(routes::auth_routes::handle(req, state, rest).await);
    }

    if let Some(rest) = strip_mount(&path, "/api/concerns") {
        return Ok(routes::concerns::handle(req, state, rest).await);
    }
    if let Some(rest) = strip_mount(&path, "/api/users") {
        return Ok(routes::users::handle(req, state, rest).await);
    }
    if let Some(rest) = strip_mount(&path, "/api/policies") {
        return Ok(routes::policies::handle(req, state, rest).await);
    }
    if let Some(rest) = strip_mount(&path, "/api/comments") {
        return Ok(routes::comments::handle(req, state, rest).await);
    }
    if let Some(rest) = strip_mount(&path, "/api/ai") {
        return Ok(routes::ai_routes::handle(req, state, rest).await);
    }
    if let Some(rest) = strip_mount(&path, "/api/ideas") {
        return Ok(routes::ideas::handle(req, state, rest).await);
    }
    if let Some(rest) = strip_mount(&path, "/api/agents") {
        return Ok(routes::planner_routes::handle(req, state, rest).await);
    }
    if let Some(rest) = strip_mount(&path, "/api/notifications") {
        return Ok(routes::notifications::handle(req, state, rest).await);
    }

    let response = match (method, path.as_str()) {
        // Connectivity smoke test
        (Method::GET, "/api/test") => json_response(
            StatusCode::OK,
            &json!({ "success": true, "message": "API is reachable" }),
        ),

        (Method::GET, "/api/health") => to_boxed(routes::health_check(state).await),

        (Method::GET, "/") => welcome(),

        // Static serving for uploaded files
        (Method::GET, p) if p.starts_with("/uploads/") => serve_upload(&state, p).await,

        _ => json_response(
            StatusCode::NOT_FOUND,
            &json!({
                "success": false,
                "message": format!("Route {} not found.", path)
            }),
        ),
    };

    Ok(response)
}

/// Splits a request path on a mount prefix, returning the remainder.
///
/// `/api/users/abc` with prefix `/api/users` yields `abc`; lookalike paths
/// such as `/api/usersearch` do not match.
fn strip_mount<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        return Some("");
    }
    rest.strip_prefix('/')
}

/// Landing payload for the API root.
fn welcome() -> Response<BoxBody> {
    json_response(
        StatusCode::OK,
        &json!({
            "success": true,
            "message": "Welcome to CivicConnect API",
            "description": "Bridging Citizens and Governance",
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": {
                "auth": "/api/auth",
                "users": "/api/users",
                "health": "/api/health"
            }
        }),
    )
}

fn too_many_requests(message: &str) -> Response<BoxBody> {
    json_response(
        StatusCode::TOO_MANY_REQUESTS,
        &json!({ "success": false, "message": message }),
    )
}

/// Serve a file from the uploads directory.
///
/// The store resolves the URL path and refuses anything that escapes the
/// uploads root.
async fn serve_upload(state: &AppState, path: &str) -> Response<BoxBody> {
    let Some(file_path) = state.uploads.resolve(path) else {
        return error_response(&AppError::NotFound("File not found".to_string()));
    };

    let bytes = match tokio::fs::read(&file_path).await {
        Ok(bytes) => bytes,
        Err(_) => return error_response(&AppError::NotFound("File not found".to_string())),
    };

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", mime_for(&file_path))
        .header("Access-Control-Allow-Origin", "*")
        .body(full_body(bytes))
        .unwrap()
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn limiter_blocks_after_max_hits() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3);
        let client = ip("203.0.113.7");
        assert!(!limiter.over_limit(client));
        assert!(!limiter.over_limit(client));
        assert!(!limiter.over_limit(client));
        assert!(limiter.over_limit(client));
        assert!(limiter.over_limit(client));
    }

    #[test]
    fn limiter_tracks_clients_separately() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        let first = ip("203.0.113.7");
        let second = ip("203.0.113.8");
        assert!(!limiter.over_limit(first));
        assert!(limiter.over_limit(first));
        assert!(!limiter.over_limit(second));
    }

    #[test]
    fn limiter_resets_once_the_window_passes() {
        // A zero-length window expires immediately, so every hit starts fresh.
        let limiter = RateLimiter::new(Duration::ZERO, 1);
        let client = ip("203.0.113.7");
        assert!(!limiter.over_limit(client));
        assert!(!limiter.over_limit(client));
    }

    #[test]
    fn sweep_drops_expired_entries() {
        let limiter = RateLimiter::new(Duration::ZERO, 5);
        limiter.over_limit(ip("203.0.113.7"));
        limiter.over_limit(ip("203.0.113.8"));
        limiter.sweep();
        assert!(limiter.clients.is_empty());
    }

    #[test]
    fn strip_mount_handles_prefix_variants() {
        assert_eq!(strip_mount("/api/users", "/api/users"), Some(""));
        assert_eq!(strip_mount("/api/users/", "/api/users"), Some(""));
        assert_eq!(strip_mount("/api/users/me", "/api/users"), Some("me"));
        assert_eq!(
            strip_mount("/api/users/abc/role", "/api/users"),
            Some("abc/role")
        );
    }

    #[test]
    fn strip_mount_rejects_lookalikes() {
        assert_eq!(strip_mount("/api/usersearch", "/api/users"), None);
        assert_eq!(strip_mount("/api/user", "/api/users"), None);
        assert_eq!(strip_mount("/api/auth", "/api/users"), None);
    }

    #[test]
    fn mime_type_follows_extension() {
        assert_eq!(mime_for(Path::new("uploads/concerns/a.png")), "image/png");
        assert_eq!(mime_for(Path::new("uploads/concerns/a.JPG")), "image/jpeg");
        assert_eq!(
            mime_for(Path::new("uploads/policies/doc.pdf")),
            "application/pdf"
        );
        assert_eq!(
            mime_for(Path::new("uploads/misc/blob")),
            "application/octet-stream"
        );
    }
}
