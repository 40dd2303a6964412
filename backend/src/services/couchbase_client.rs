use crate::config::ClusterConfig;
use crate::utils::{ApiError, ApiResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

/// Statement fetching the index catalog
pub const INDEXES_STATEMENT: &str = "SELECT s.* FROM system:indexes AS s";

/// Where and as whom to run statements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTarget {
    pub query_url: String,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
}

impl From<&ClusterConfig> for ClusterTarget {
    fn from(config: &ClusterConfig) -> Self {
        Self {
            query_url: config.query_url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }
}

impl ClusterTarget {
    pub fn service_url(&self) -> String {
        format!("{}/query/service", self.query_url.trim_end_matches('/'))
    }
}

/// Result of a connectivity check
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResult {
    pub query_url: String,
    pub reachable: bool,
    pub elapsed_ms: u64,
    pub message: String,
}

/// N1QL query service seam; handlers only ever see this trait
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Run one statement and return its `results` array
    async fn execute(&self, target: &ClusterTarget, statement: &str) -> ApiResult<Vec<Value>>;

    /// Cheap `SELECT 1` round trip
    async fn ping(&self, target: &ClusterTarget) -> PingResult;
}

pub struct CouchbaseQueryClient {
    http_client: Client,
}

impl CouchbaseQueryClient {
    pub fn new(timeout_secs: u64) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build HTTP client for query service: {}", e);
                tracing::warn!("Using default HTTP client configuration as fallback");
                Client::default()
            });

        Self { http_client }
    }
}

#[async_trait]
impl QueryService for CouchbaseQueryClient {
    async fn execute(&self, target: &ClusterTarget, statement: &str) -> ApiResult<Vec<Value>> {
        let url = target.service_url();
        tracing::debug!("Running statement against {}: {}", url, statement);

        let response = self
            .http_client
            .post(&url)
            .basic_auth(&target.username, Some(&target.password))
            .json(&json!({ "statement": statement }))
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to reach query service at {}: {}", url, e);
                ApiError::cluster_connection_failed(format!("Request to {} failed: {}", url, e))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            ApiError::cluster_connection_failed(format!("Failed to read response body: {}", e))
        })?;

        let payload: Value = serde_json::from_str(&body).map_err(|e| {
            if status.is_success() {
                ApiError::ClusterBadResponse(format!("Response is not JSON: {}", e))
            } else {
                // auth failures come back as plain text
                ApiError::cluster_query_failed(format!("HTTP {}: {}", status, body.trim()))
            }
        })?;

        interpret_response(status.as_u16(), payload)
    }

    async fn ping(&self, target: &ClusterTarget) -> PingResult {
        let started = std::time::Instant::now();
        let outcome = self.execute(target, "SELECT 1").await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(_) => PingResult {
                query_url: target.query_url.clone(),
                reachable: true,
                elapsed_ms,
                message: "Query service reachable".to_string(),
            },
            Err(e) => {
                tracing::warn!("Ping of {} failed: {}", target.query_url, e);
                PingResult {
                    query_url: target.query_url.clone(),
                    reachable: false,
                    elapsed_ms,
                    message: e.to_string(),
                }
            },
        }
    }
}

/// Map a query service envelope onto its results or an error
///
/// The service reports statement failures with HTTP 200 or 4xx/5xx and a
/// non-"success" `status` plus an `errors` array; both paths land here.
fn interpret_response(http_status: u16, payload: Value) -> ApiResult<Vec<Value>> {
    let status = payload.get("status").and_then(Value::as_str).unwrap_or("");

    if status != "success" || !(200..300).contains(&http_status) {
        let message = payload
            .get("errors")
            .and_then(Value::as_array)
            .map(|errors| {
                errors
                    .iter()
                    .map(|e| {
                        let code = e.get("code").and_then(Value::as_i64).unwrap_or_default();
                        let msg = e.get("msg").and_then(Value::as_str).unwrap_or("unknown error");
                        format!("[{}] {}", code, msg)
                    })
                    .collect::<Vec<_>>()
                    .join("; ")
            })
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("HTTP {} with status '{}'", http_status, status));
        return Err(ApiError::cluster_query_failed(message));
    }

    match payload {
        Value::Object(mut obj) => match obj.remove("results") {
            Some(Value::Array(rows)) => Ok(rows),
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(_) => Err(ApiError::ClusterBadResponse("'results' is not an array".to_string())),
        },
        _ => Err(ApiError::ClusterBadResponse("Response is not an object".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_url_trims_slash() {
        let target = ClusterTarget {
            query_url: "http://cb1:8093/".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
        };
        assert_eq!(target.service_url(), "http://cb1:8093/query/service");
    }

    #[test]
    fn test_success_envelope() {
        let rows = interpret_response(
            200,
            json!({"requestID": "x", "status": "success", "results": [{"a": 1}, {"a": 2}]}),
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_error_envelope() {
        let err = interpret_response(
            404,
            json!({"status": "fatal", "errors": [{"code": 12003, "msg": "Keyspace not found"}]}),
        )
        .unwrap_err();
        assert_eq!(err.error_code(), 2002);
        assert!(err.to_string().contains("[12003] Keyspace not found"));
    }

    #[test]
    fn test_results_must_be_array() {
        let err = interpret_response(200, json!({"status": "success", "results": 5})).unwrap_err();
        assert_eq!(err.error_code(), 2003);
    }

    #[test]
    fn test_password_not_serialized() {
        let target = ClusterTarget {
            query_url: "http://cb1:8093".to_string(),
            username: "Administrator".to_string(),
            password: "secret".to_string(),
        };
        let text = serde_json::to_string(&target).unwrap();
        assert!(!text.contains("secret"));
    }
}
