//! Configuration for CivicConnect
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use uuid::Uuid;

/// CivicConnect - citizen engagement backend
///
/// Ideas, concerns, policies, and participatory budgeting.
#[derive(Parser, Debug, Clone)]
#[command(name = "civic-connect")]
#[command(about = "Citizen engagement backend with AI-assisted budget planning")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (insecure secret fallbacks)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "civic_connect")]
    pub mongodb_db: String,

    /// Secret for signing short-lived access tokens (required in production)
    #[arg(long, env = "JWT_ACCESS_SECRET")]
    pub jwt_access_secret: Option<String>,

    /// Secret for signing refresh tokens (required in production)
    #[arg(long, env = "JWT_REFRESH_SECRET")]
    pub jwt_refresh_secret: Option<String>,

    /// Access token lifetime in seconds
    #[arg(long, env = "ACCESS_TOKEN_TTL_SECONDS", default_value = "900")]
    pub access_token_ttl_seconds: u64,

    /// Refresh token lifetime in seconds (default 7 days)
    #[arg(long, env = "REFRESH_TOKEN_TTL_SECONDS", default_value = "604800")]
    pub refresh_token_ttl_seconds: u64,

    /// Secret used to derive the encryption key for citizen identity
    /// documents (Aadhar/PAN). Required in production.
    #[arg(long, env = "PII_SECRET")]
    pub pii_secret: Option<String>,

    /// API key for the generative-language delegate
    #[arg(long, env = "GEMINI_API_KEY")]
    pub gemini_api_key: Option<String>,

    /// Model name for the generative-language delegate
    #[arg(long, env = "GEMINI_MODEL", default_value = "gemini-2.0-flash")]
    pub gemini_model: String,

    /// Base URL of the generative-language API
    #[arg(
        long,
        env = "GEMINI_BASE_URL",
        default_value = "https://generativelanguage.googleapis.com/v1beta"
    )]
    pub gemini_base_url: String,

    /// Directory for uploaded files (concern images, policy PDFs)
    #[arg(long, env = "UPLOADS_DIR", default_value = "uploads")]
    pub uploads_dir: String,

    /// When the budget-sufficiency probe fails, proceed with allocation
    /// anyway instead of aborting the run
    #[arg(long, env = "PLANNER_SUFFICIENCY_FAIL_OPEN", default_value = "true")]
    pub planner_sufficiency_fail_open: bool,

    /// When a scoring batch fails, continue with the ideas scored so far
    /// instead of aborting the whole run. Off by default: a partial run
    /// would silently drop ideas from the plan.
    #[arg(long, env = "PLANNER_SCORING_FAIL_OPEN", default_value = "false")]
    pub planner_scoring_fail_open: bool,

    /// When the executive-summary call fails, fall back to a generated
    /// summary instead of aborting the run
    #[arg(long, env = "PLANNER_SUMMARY_FAIL_OPEN", default_value = "true")]
    pub planner_summary_fail_open: bool,

    /// Rate-limit window in seconds
    #[arg(long, env = "RATE_LIMIT_WINDOW_SECONDS", default_value = "900")]
    pub rate_limit_window_seconds: u64,

    /// Maximum requests per IP per window across the whole API
    #[arg(long, env = "RATE_LIMIT_MAX_REQUESTS", default_value = "500")]
    pub rate_limit_max_requests: u32,

    /// Maximum requests per IP per window on /api/auth routes
    #[arg(long, env = "AUTH_RATE_LIMIT_MAX_REQUESTS", default_value = "100")]
    pub auth_rate_limit_max_requests: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Request timeout in milliseconds (applies to delegate calls)
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,
}

impl Args {
    /// Get effective access-token secret (uses default in dev mode)
    pub fn access_secret(&self) -> String {
        if self.dev_mode {
            self.jwt_access_secret
                .clone()
                .unwrap_or_else(|| "dev-only-insecure-access-secret".to_string())
        } else {
            self.jwt_access_secret
                .clone()
                .expect("JWT_ACCESS_SECRET is required in production mode")
        }
    }

    /// Get effective refresh-token secret (uses default in dev mode)
    pub fn refresh_secret(&self) -> String {
        if self.dev_mode {
            self.jwt_refresh_secret
                .clone()
                .unwrap_or_else(|| "dev-only-insecure-refresh-secret".to_string())
        } else {
            self.jwt_refresh_secret
                .clone()
                .expect("JWT_REFRESH_SECRET is required in production mode")
        }
    }

    /// Get effective PII encryption secret (uses default in dev mode)
    pub fn pii_key_secret(&self) -> String {
        if self.dev_mode {
            self.pii_secret
                .clone()
                .unwrap_or_else(|| "dev-only-insecure-pii-secret".to_string())
        } else {
            self.pii_secret
                .clone()
                .expect("PII_SECRET is required in production mode")
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode {
            if self.jwt_access_secret.is_none() {
                return Err("JWT_ACCESS_SECRET is required in production mode".to_string());
            }
            if self.jwt_refresh_secret.is_none() {
                return Err("JWT_REFRESH_SECRET is required in production mode".to_string());
            }
            if self.pii_secret.is_none() {
                return Err("PII_SECRET is required in production mode".to_string());
            }
        }

        if self.access_token_ttl_seconds == 0 || self.refresh_token_ttl_seconds == 0 {
            return Err("Token lifetimes must be greater than zero".to_string());
        }

        if self.refresh_token_ttl_seconds <= self.access_token_ttl_seconds {
            return Err(
                "REFRESH_TOKEN_TTL_SECONDS must be greater than ACCESS_TOKEN_TTL_SECONDS"
                    .to_string(),
            );
        }

        if self.rate_limit_window_seconds == 0 {
            return Err("RATE_LIMIT_WINDOW_SECONDS must be greater than zero".to_string());
        }

        Ok(())
    }
}
