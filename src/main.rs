//! CivicConnect - citizen engagement backend

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use civic_connect::{
    ai::{GeminiClient, LanguageModel},
    config::Args,
    db::MongoClient,
    server::{self, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("civic_connect={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  CivicConnect - Citizen Engagement");
    info!("  Bridging Citizens and Governance");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!(
        "Mode: {}",
        if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" }
    );
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Database: {}", args.mongodb_db);
    info!("Delegate: {} via {}", args.gemini_model, args.gemini_base_url);
    info!("Uploads: {}", args.uploads_dir);
    info!("======================================");

    // Connect to MongoDB
    let mongo = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            client
        }
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    };

    // Language-model delegate. The platform runs without a key; AI routes
    // and the planner surface delegate errors (or fail open where
    // configured) until one is provided.
    let api_key = args.gemini_api_key.clone().unwrap_or_default();
    if api_key.is_empty() {
        warn!("GEMINI_API_KEY not set - AI features will fail until configured");
    }
    let delegate: Arc<dyn LanguageModel> = Arc::new(GeminiClient::new(
        &args.gemini_base_url,
        &args.gemini_model,
        &api_key,
        args.request_timeout_ms,
    ));

    // Create application state
    let state = Arc::new(AppState::new(args, mongo, delegate));

    // Prepare upload directories before accepting traffic
    if let Err(e) = state.uploads.ensure_dirs().await {
        error!("Failed to prepare uploads directory: {}", e);
        std::process::exit(1);
    }
    info!("Uploads directory ready at {}", state.args.uploads_dir);

    // Run the server
    if let Err(e) = server::run(state).await {
        error!("Server error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}
