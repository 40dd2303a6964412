use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::services::query_analyzer::aggregator::TimeGranularity;
use crate::services::query_analyzer::models::FlowGraph;
use crate::services::query_analyzer::{
    AnalysisConfig, AnalysisSession, InsightReport, InsightThresholds, analyze,
};
use crate::services::session_store::{SessionInfo, SessionSource};
use crate::utils::{ApiError, ApiResult};

/// Per-request tweaks on top of the configured `[analysis]` section
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOverrides {
    pub time_granularity: Option<TimeGranularity>,
    #[validate(range(min = 1, max = 4096))]
    pub max_plan_depth: Option<usize>,
    /// Replaces the configured thresholds wholesale; omitted keys take defaults
    pub thresholds: Option<InsightThresholds>,
}

impl AnalysisOverrides {
    pub fn apply(&self, base: &AnalysisConfig) -> ApiResult<AnalysisConfig> {
        let mut config = base.clone();
        if let Some(granularity) = self.time_granularity {
            config.time_granularity = granularity;
        }
        if let Some(depth) = self.max_plan_depth {
            config.max_plan_depth = depth;
        }
        if let Some(thresholds) = &self.thresholds {
            config.thresholds = thresholds.clone();
        }
        config.validate().map_err(ApiError::validation_error)?;
        Ok(config)
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    /// `system:completed_requests` rows, or a `{"results": [...]}` envelope
    pub requests: Value,
    pub indexes: Option<Value>,
    pub schema: Option<Value>,
    #[validate(length(max = 200, message = "Label must be at most 200 characters"))]
    pub label: Option<String>,
    #[serde(default)]
    pub options: AnalysisOverrides,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    pub id: Uuid,
    pub session: Arc<AnalysisSession>,
}

/// Run the analyzer off the async workers
pub async fn run_analysis(
    config: AnalysisConfig,
    requests: Value,
    indexes: Option<Value>,
    schema: Option<Value>,
) -> ApiResult<AnalysisSession> {
    tokio::task::spawn_blocking(move || {
        analyze(requests, indexes.as_ref(), schema.as_ref(), &config)
    })
    .await
    .map_err(|e| ApiError::internal_error(format!("Analysis task failed: {}", e)))?
    .map_err(ApiError::from)
}

pub fn parse_session_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| ApiError::invalid_data(format!("Invalid session id: {}", raw)))
}

/// One-shot analysis; nothing is stored
pub async fn analyze_upload(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalyzeRequest>,
) -> ApiResult<Json<AnalysisSession>> {
    req.validate()?;
    req.options.validate()?;
    let config = req.options.apply(&state.config.analysis)?;

    tracing::info!("Analyze request: granularity={}", config.time_granularity);
    let session = run_analysis(config, req.requests, req.indexes, req.schema).await?;
    Ok(Json(session))
}

/// Analyze and keep the snapshot under a fresh id
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalyzeRequest>,
) -> ApiResult<Json<SessionCreated>> {
    req.validate()?;
    req.options.validate()?;
    let config = req.options.apply(&state.config.analysis)?;

    let source = SessionSource {
        requests: req.requests,
        indexes: req.indexes,
        schema: req.schema,
        label: req.label,
    };
    let session = run_analysis(
        config,
        source.requests.clone(),
        source.indexes.clone(),
        source.schema.clone(),
    )
    .await?;

    let (id, session) = state.session_store.insert(session, source);
    tracing::info!("Created session {}", id);
    Ok(Json(SessionCreated { id, session }))
}

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionInfo>> {
    Json(state.session_store.list())
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Arc<AnalysisSession>>> {
    let id = parse_session_id(&id)?;
    Ok(Json(state.session_store.get(&id)?))
}

pub async fn get_session_insights(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<InsightReport>> {
    let id = parse_session_id(&id)?;
    let session = state.session_store.get(&id)?;
    Ok(Json(session.insights.clone()))
}

pub async fn get_session_flow_graph(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<FlowGraph>> {
    let id = parse_session_id(&id)?;
    let session = state.session_store.get(&id)?;
    Ok(Json(session.flow_graph.clone()))
}

/// Rebuild a stored session from its original upload with new options
///
/// The old snapshot stays readable until the new one is swapped in.
pub async fn reanalyze_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(options): Json<AnalysisOverrides>,
) -> ApiResult<Json<Arc<AnalysisSession>>> {
    let id = parse_session_id(&id)?;
    options.validate()?;
    let config = options.apply(&state.config.analysis)?;
    let source = state.session_store.source(&id)?;

    tracing::info!("Re-analyzing session {} with granularity={}", id, config.time_granularity);
    let session = run_analysis(
        config,
        source.requests.clone(),
        source.indexes.clone(),
        source.schema.clone(),
    )
    .await?;

    Ok(Json(state.session_store.replace(&id, session)?))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_session_id(&id)?;
    state.session_store.remove(&id)?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply_on_top_of_config() {
        let base = AnalysisConfig::default();
        let overrides = AnalysisOverrides {
            time_granularity: Some(TimeGranularity::Day),
            max_plan_depth: Some(32),
            thresholds: None,
        };
        let config = overrides.apply(&base).unwrap();
        assert_eq!(config.time_granularity, TimeGranularity::Day);
        assert_eq!(config.max_plan_depth, 32);
        assert_eq!(config.thresholds, base.thresholds);
    }

    #[test]
    fn test_inverted_timeout_band_rejected() {
        let thresholds = InsightThresholds {
            statement_timeout_ms: 1_000.0,
            timeout_approach_lower_bound_ms: 5_000.0,
            ..Default::default()
        };
        let overrides = AnalysisOverrides { thresholds: Some(thresholds), ..Default::default() };
        let err = overrides.apply(&AnalysisConfig::default()).unwrap_err();
        assert_eq!(err.error_code(), 4001);
    }

    #[test]
    fn test_parse_session_id() {
        assert!(parse_session_id("not-a-uuid").is_err());
        let id = Uuid::new_v4();
        assert_eq!(parse_session_id(&id.to_string()).unwrap(), id);
    }
}
