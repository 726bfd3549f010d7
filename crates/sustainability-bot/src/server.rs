//! Process wiring: storage, model client, scheduler and the HTTP router.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Method, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api;
use crate::auth::{self, TokenAuthority};
use crate::config::Config;
use crate::memory_db::ChatDatabase;
use crate::metrics;
use crate::model_runtime::{CompletionProvider, OpenAiRuntime};
use crate::pipeline::ResponsePipeline;
use crate::prompt_store::PromptStore;
use crate::scheduler::{BatchReport, TraitMiner, TraitMiningService};
use crate::shared_state::AppState;

/// Start the API server and, when enabled, the trait-mining schedule.
/// Returns after a shutdown signal once in-flight requests have drained.
pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::telemetry::init_tracing();
    metrics::init_metrics();
    cfg.print_config();

    let (database, provider) = open_backends(&cfg)?;

    let scheduler = if cfg.trait_mining_enabled {
        let miner = TraitMiner::new(Arc::clone(&database), Arc::clone(&provider), cfg.miner_config());
        let service = TraitMiningService::new(miner, cfg.cadence()?);
        service.start().await;
        Some(service)
    } else {
        info!("Trait mining disabled");
        None
    };

    let pipeline = ResponsePipeline::new(
        Arc::clone(&database),
        provider,
        cfg.chat_options(),
        cfg.usd_inr_rate,
        cfg.history_limit,
    );
    let tokens = TokenAuthority::new(
        &cfg.api_key,
        &cfg.token_secret,
        chrono::Duration::minutes(cfg.token_ttl_minutes),
    )?;
    let state = AppState::new(database, pipeline, tokens, PromptStore::new(&cfg.prompt_file));

    let addr = cfg.api_addr()?;
    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = build_router(state, Duration::from_secs(cfg.request_timeout_seconds));

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }
    served?;
    info!("Server stopped");
    Ok(())
}

/// One trait-mining pass outside the schedule, for the `mine-traits` command.
pub async fn mine_traits_once(cfg: Config) -> anyhow::Result<BatchReport> {
    crate::telemetry::init_tracing();
    let (database, provider) = open_backends(&cfg)?;
    let report = TraitMiner::new(database, provider, cfg.miner_config())
        .run_batch_pass()
        .await?;
    Ok(report)
}

fn open_backends(cfg: &Config) -> anyhow::Result<(Arc<ChatDatabase>, Arc<dyn CompletionProvider>)> {
    let database = Arc::new(ChatDatabase::new(Path::new(&cfg.database_path))?);
    info!("Chat database initialized at: {}", cfg.database_path);

    let provider: Arc<dyn CompletionProvider> = Arc::new(OpenAiRuntime::new(
        cfg.llm_base_url.clone(),
        cfg.llm_api_key.clone(),
        cfg.pricing(),
        cfg.llm_timeout(),
    )?);
    info!("Model provider: {}", provider.name());
    Ok((database, provider))
}

pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let protected = Router::new()
        .route("/get-prompt", get(api::get_prompt))
        .route("/update-prompt", post(api::update_prompt))
        .route("/upsert-user", post(api::upsert_user))
        .route("/send-message", post(api::send_message))
        .route("/update-feedback", post(api::update_feedback))
        .route("/get-message/:message_id", get(api::get_message))
        .route("/messages", get(api::get_all_messages))
        .route("/messages/:user_id", get(api::get_user_messages))
        .route("/users", get(api::list_users))
        .route("/users/:user_id", get(api::get_user))
        .route("/analytics", get(api::get_analytics))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_bearer));

    let api_routes = Router::new()
        .route("/generate-bearer-token", post(api::generate_bearer_token))
        .merge(protected);

    Router::new()
        .nest("/api", api_routes)
        .route("/healthz", get(|| async { "OK" }))
        .route("/metrics", get(metrics::get_metrics))
        .layer(middleware::from_fn(track_requests))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

async fn track_requests(req: Request<Body>, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let response = next.run(req).await;
    metrics::inc_request(&route, response.status().as_str());
    response
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
