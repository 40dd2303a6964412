use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::AppState;
use crate::handlers::analysis::{AnalysisOverrides, run_analysis};
use crate::services::couchbase_client::{ClusterTarget, INDEXES_STATEMENT, PingResult};
use crate::services::query_analyzer::AnalysisSession;
use crate::services::session_store::SessionSource;
use crate::utils::{ApiError, ApiResult};

fn validate_query_url(url: &str) -> Result<(), ValidationError> {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        let mut err = ValidationError::new("query_url");
        err.message = Some("queryUrl must start with http:// or https://".into());
        Err(err)
    }
}

/// Connection fields; anything omitted falls back to the `[cluster]` section
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConnection {
    #[validate(custom(function = "validate_query_url"))]
    pub query_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ClusterConnection {
    fn resolve(&self, state: &AppState) -> ClusterTarget {
        // trim to avoid DNS failures on pasted hosts
        let non_empty = |s: &Option<String>| {
            s.as_ref().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        };
        let mut target = ClusterTarget::from(&state.config.cluster);
        if let Some(url) = non_empty(&self.query_url) {
            target.query_url = url;
        }
        if let Some(username) = non_empty(&self.username) {
            target.username = username;
        }
        if let Some(password) = &self.password {
            target.password = password.clone();
        }
        target
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ClusterQueryRequest {
    #[serde(default)]
    pub connection: ClusterConnection,
    /// Defaults to the configured completed_requests statement
    #[validate(length(min = 1, max = 65536))]
    pub statement: Option<String>,
    /// Analyze the rows instead of returning them
    #[serde(default)]
    pub analyze: bool,
    /// Also fetch `system:indexes` for the analysis
    #[serde(default)]
    pub include_indexes: bool,
    /// Keep the resulting snapshot in the session store
    #[serde(default)]
    pub save: bool,
    #[validate(length(max = 200))]
    pub label: Option<String>,
    #[serde(default)]
    pub options: AnalysisOverrides,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterQueryResponse {
    pub query_url: String,
    pub row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Arc<AnalysisSession>>,
}

/// Check the query service with the given or configured credentials
pub async fn test_connection(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClusterConnection>,
) -> ApiResult<Json<PingResult>> {
    req.validate()?;
    let target = req.resolve(&state);
    tracing::info!("Testing query service connection: {}", target.query_url);

    let result = state.query_client.ping(&target).await;
    tracing::debug!("Connection test result: reachable={}", result.reachable);
    Ok(Json(result))
}

/// Run a statement against a live cluster, optionally analyzing the rows
pub async fn run_query(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClusterQueryRequest>,
) -> ApiResult<Json<ClusterQueryResponse>> {
    req.validate()?;
    req.connection.validate()?;
    req.options.validate()?;
    if req.save && !req.analyze {
        return Err(ApiError::validation_error("save requires analyze"));
    }

    let target = req.connection.resolve(&state);
    let statement = req
        .statement
        .clone()
        .unwrap_or_else(|| state.config.cluster.completed_requests_statement.clone());

    tracing::info!("Cluster query on {}: analyze={}", target.query_url, req.analyze);
    let rows = state.query_client.execute(&target, &statement).await?;
    let row_count = rows.len();
    tracing::info!("Cluster query returned {} rows", row_count);

    if !req.analyze {
        return Ok(Json(ClusterQueryResponse {
            query_url: target.query_url,
            row_count,
            rows: Some(rows),
            session_id: None,
            session: None,
        }));
    }

    let config = req.options.apply(&state.config.analysis)?;
    let indexes = if req.include_indexes {
        match state.query_client.execute(&target, INDEXES_STATEMENT).await {
            Ok(index_rows) => Some(Value::Array(index_rows)),
            Err(e) => {
                tracing::warn!("Index catalog fetch failed, analyzing without it: {}", e);
                None
            },
        }
    } else {
        None
    };

    let requests = Value::Array(rows);
    let (session_id, session) = if req.save {
        let source = SessionSource {
            requests: requests.clone(),
            indexes: indexes.clone(),
            schema: None,
            label: req.label.clone(),
        };
        let session = run_analysis(config, requests, indexes, None).await?;
        let (id, session) = state.session_store.insert(session, source);
        (Some(id), session)
    } else {
        (None, Arc::new(run_analysis(config, requests, indexes, None).await?))
    };

    Ok(Json(ClusterQueryResponse {
        query_url: target.query_url,
        row_count,
        rows: None,
        session_id,
        session: Some(session),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_url_validation() {
        let conn = ClusterConnection {
            query_url: Some("cb1:8093".to_string()),
            ..Default::default()
        };
        assert!(conn.validate().is_err());

        let conn = ClusterConnection {
            query_url: Some("https://cb1:18093".to_string()),
            ..Default::default()
        };
        assert!(conn.validate().is_ok());
        assert!(ClusterConnection::default().validate().is_ok());
    }
}
