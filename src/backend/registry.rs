//! Session-scoped tracking of materialized results
//!
//! Every result the server rewriter creates is registered under the host
//! session that asked for it. `cleanup_session` drops all of them; a result
//! whose drop fails stays registered so a later cleanup can retry.
//!
//! Results are handed out as `Arc`s so a reader holding one is unaffected by
//! a concurrent cleanup removing it from the registry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::dataset::BackendResult;
use crate::error::{OptimizerError, OptimizerResult};
use crate::expr::{quote_ident, QualifiedName};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

/// Connection to a SQL server, supplied by the host
pub trait ServerConnection: Send + Sync {
    /// Run one statement; the result set, if any, is discarded
    fn execute(&self, sql: &str) -> BackendResult<()>;
}

/// A precomputed result living on the server
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterializedResultRef {
    /// Session that owns the result
    pub session_id: String,
    /// Schema-qualified name of the result
    pub name: QualifiedName,
    /// Column holding the source row ids
    pub key_column: String,
    pub created_at: DateTime<Utc>,
}

impl MaterializedResultRef {
    pub fn new(session_id: impl Into<String>, name: QualifiedName, key_column: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            name,
            key_column: key_column.into(),
            created_at: Utc::now(),
        }
    }

    /// `"id" IN (SELECT "key" FROM <result>)`
    pub fn membership_predicate(&self, id_column: &str) -> String {
        format!(
            "{} IN (SELECT {} FROM {})",
            quote_ident(id_column),
            quote_ident(&self.key_column),
            self.name.render()
        )
    }

    pub fn drop_statement(&self) -> String {
        format!("DROP MATERIALIZED VIEW IF EXISTS {} CASCADE", self.name.render())
    }
}

/// Generate a fresh session id for hosts that do not bring their own
pub fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Registry of materialized results per session
pub struct MaterializationRegistry {
    sessions: Mutex<HashMap<String, Vec<Arc<MaterializedResultRef>>>>,
    metrics: Arc<MetricsRegistry>,
}

impl MaterializationRegistry {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Track a result under its session
    pub fn register(&self, result: MaterializedResultRef) -> Arc<MaterializedResultRef> {
        let result = Arc::new(result);
        self.sessions
            .lock()
            .entry(result.session_id.clone())
            .or_default()
            .push(result.clone());
        result
    }

    /// Look up a live result by name (bare or schema-qualified)
    pub fn resolve(&self, session_id: &str, name: &str) -> OptimizerResult<Arc<MaterializedResultRef>> {
        let sessions = self.sessions.lock();
        sessions
            .get(session_id)
            .and_then(|results| {
                results
                    .iter()
                    .find(|r| r.name.name == name || r.name.to_string() == name || r.name.render() == name)
                    .cloned()
            })
            .ok_or_else(|| OptimizerError::UnknownMaterializedResult(format!("{}/{}", session_id, name)))
    }

    /// Results currently tracked for a session
    pub fn session_results(&self, session_id: &str) -> Vec<Arc<MaterializedResultRef>> {
        self.sessions
            .lock()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn total_results(&self) -> usize {
        self.sessions.lock().values().map(Vec::len).sum()
    }

    /// Drop every result of a session, returning how many were dropped
    pub fn cleanup_session(&self, connection: &dyn ServerConnection, session_id: &str) -> usize {
        // Detach first so drops run without holding the lock
        let results = match self.sessions.lock().remove(session_id) {
            Some(results) => results,
            None => return 0,
        };

        let mut dropped = 0usize;
        let mut kept = Vec::new();
        for result in results {
            let name = result.name.to_string();
            match connection.execute(&result.drop_statement()) {
                Ok(()) => {
                    dropped += 1;
                    log_event_with_fields(
                        Event::MaterializationDropped,
                        &[("session", session_id), ("name", &name)],
                    );
                }
                Err(e) => {
                    let reason = e.to_string();
                    log_event_with_fields(
                        Event::MaterializationDropFailed,
                        &[("session", session_id), ("name", &name), ("reason", &reason)],
                    );
                    kept.push(result);
                }
            }
        }

        let failed = kept.len();
        if !kept.is_empty() {
            self.sessions
                .lock()
                .entry(session_id.to_string())
                .or_default()
                .extend(kept);
        }

        self.metrics.add_materializations_dropped(dropped as u64);
        let dropped_str = dropped.to_string();
        let failed_str = failed.to_string();
        log_event_with_fields(
            Event::SessionCleanup,
            &[("session", session_id), ("dropped", &dropped_str), ("failed", &failed_str)],
        );
        dropped
    }
}
