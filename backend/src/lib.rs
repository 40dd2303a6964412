//! Couchbase Query Analyzer Library
//!
//! Core modules behind the `cb-query-analyzer` binary: the completed-request
//! analyzer, its REST surface and the query service client.

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::sync::Arc;

pub mod config;
pub mod handlers;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::{CommandLineArgs, Config};
pub use services::query_analyzer::{AnalysisConfig, AnalysisSession, analyze, analyze_text};
pub use services::{CouchbaseQueryClient, QueryService, SessionStore};

/// Application shared state
///
/// Sessions are plain in-memory snapshots; the query service sits behind a
/// trait object so tests can swap in a stub.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub session_store: SessionStore,
    pub query_client: Arc<dyn QueryService>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let query_client = Arc::new(CouchbaseQueryClient::new(config.cluster.timeout_secs));
        Self::with_query_service(config, query_client)
    }

    pub fn with_query_service(config: Config, query_client: Arc<dyn QueryService>) -> Self {
        let session_store =
            SessionStore::new(config.sessions.max_sessions, config.sessions.ttl_secs);
        Self { config: Arc::new(config), session_store, query_client }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.server.body_limit_mb.saturating_mul(1024 * 1024);

    let api_routes = Router::new()
        .route("/api/analyze", post(handlers::analysis::analyze_upload))
        .route(
            "/api/sessions",
            get(handlers::analysis::list_sessions).post(handlers::analysis::create_session),
        )
        .route(
            "/api/sessions/:id",
            get(handlers::analysis::get_session).delete(handlers::analysis::delete_session),
        )
        .route("/api/sessions/:id/insights", get(handlers::analysis::get_session_insights))
        .route("/api/sessions/:id/flow-graph", get(handlers::analysis::get_session_flow_graph))
        .route("/api/sessions/:id/reanalyze", post(handlers::analysis::reanalyze_session))
        .route("/api/cluster/test", post(handlers::cluster::test_connection))
        .route("/api/cluster/query", post(handlers::cluster::run_query));

    let health_routes = Router::new().route("/health", get(handlers::system::health_check));

    Router::new()
        .merge(api_routes)
        .merge(health_routes)
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
}
