use crate::services::query_analyzer::AnalysisSession;
use crate::utils::{ApiError, ApiResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Raw payloads a session was built from, kept for re-analysis
#[derive(Debug, Default)]
pub struct SessionSource {
    pub requests: Value,
    pub indexes: Option<Value>,
    pub schema: Option<Value>,
    pub label: Option<String>,
}

struct StoredSession {
    session: Arc<AnalysisSession>,
    source: Arc<SessionSource>,
    stored_at: DateTime<Utc>,
}

/// Listing row for `GET /api/sessions`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: Uuid,
    pub label: Option<String>,
    pub stored_at: DateTime<Utc>,
    pub total_input: usize,
    pub valid: usize,
    pub insight_count: usize,
}

/// In-memory analysis snapshots keyed by id
///
/// Readers get an `Arc` to a finished session. Replacing a session swaps the
/// `Arc` under the same id, so a reader holding the old one keeps a
/// consistent view.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<Uuid, StoredSession>>,
    max_sessions: usize,
    ttl: ChronoDuration,
}

impl SessionStore {
    pub fn new(max_sessions: usize, ttl_secs: u64) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            max_sessions: max_sessions.max(1),
            ttl: ChronoDuration::seconds(ttl_secs.min(i64::MAX as u64 / 1000) as i64),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Store a new session, evicting the oldest ones past capacity
    ///
    /// Returns the stored `Arc` too; the entry itself may already be gone
    /// by the time the caller looks it up again.
    pub fn insert(
        &self,
        session: AnalysisSession,
        source: SessionSource,
    ) -> (Uuid, Arc<AnalysisSession>) {
        let id = Uuid::new_v4();
        let session = Arc::new(session);
        self.sessions.insert(
            id,
            StoredSession {
                session: Arc::clone(&session),
                source: Arc::new(source),
                stored_at: Utc::now(),
            },
        );

        while self.sessions.len() > self.max_sessions {
            let oldest = self
                .sessions
                .iter()
                .filter(|entry| *entry.key() != id)
                .min_by_key(|entry| entry.value().stored_at)
                .map(|entry| *entry.key());
            match oldest {
                Some(oldest) => {
                    self.sessions.remove(&oldest);
                    tracing::info!("Evicted session {} (capacity {})", oldest, self.max_sessions);
                },
                None => break,
            }
        }

        tracing::debug!("Stored session {} ({} total)", id, self.sessions.len());
        (id, session)
    }

    pub fn get(&self, id: &Uuid) -> ApiResult<Arc<AnalysisSession>> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(&entry.session))
            .ok_or_else(|| ApiError::session_not_found(id.to_string()))
    }

    pub fn source(&self, id: &Uuid) -> ApiResult<Arc<SessionSource>> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(&entry.source))
            .ok_or_else(|| ApiError::session_not_found(id.to_string()))
    }

    /// Swap in a re-analyzed session under an existing id
    pub fn replace(&self, id: &Uuid, session: AnalysisSession) -> ApiResult<Arc<AnalysisSession>> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| ApiError::session_not_found(id.to_string()))?;
        let session = Arc::new(session);
        entry.session = Arc::clone(&session);
        entry.stored_at = Utc::now();
        tracing::info!("Replaced session {}", id);
        Ok(session)
    }

    pub fn remove(&self, id: &Uuid) -> ApiResult<()> {
        self.sessions
            .remove(id)
            .map(|_| tracing::info!("Removed session {}", id))
            .ok_or_else(|| ApiError::session_not_found(id.to_string()))
    }

    /// Newest first
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|entry| {
                let stored = entry.value();
                SessionInfo {
                    id: *entry.key(),
                    label: stored.source.label.clone(),
                    stored_at: stored.stored_at,
                    total_input: stored.session.summary.total_input,
                    valid: stored.session.summary.valid,
                    insight_count: stored.session.insights.insights.len(),
                }
            })
            .collect();
        infos.sort_by(|a, b| b.stored_at.cmp(&a.stored_at).then_with(|| a.id.cmp(&b.id)));
        infos
    }

    /// Drop sessions older than the TTL as of `now`; returns how many went
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, stored| now - stored.stored_at < self.ttl);
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            tracing::info!("Expired {} session(s)", removed);
        }
        removed
    }

    /// Periodic TTL sweep on the tokio runtime
    pub fn start_expiry_task(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tracing::info!("Session expiry task started with interval: {:?}", interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                store.evict_expired(Utc::now());
            }
        })
    }
}
