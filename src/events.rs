//! Event Ingestion Log: append-only listening activity.

use crate::db::DbPool;
use crate::error::{is_constraint, CoreError, Result, SQLITE_CONSTRAINT_FOREIGNKEY};
use crate::models::{ActivityEvent, Payload};
use crate::recommendations::RecommendationAggregator;
use chrono::Utc;
use rusqlite::params;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct EventLog {
    pool: DbPool,
    aggregator: RecommendationAggregator,
}

impl EventLog {
    pub fn new(pool: DbPool, aggregator: RecommendationAggregator) -> Self {
        Self { pool, aggregator }
    }

    /// Append one event and then run a full aggregation before returning.
    ///
    /// The aggregation is system-wide and synchronous, so ingestion latency
    /// includes it. If the aggregation fails the event stays recorded and the
    /// error is returned; the next successful run picks it up.
    pub fn append(&self, user_id: &str, kind: &str, payload: &Payload) -> Result<i64> {
        let id = self.insert(user_id, kind, payload)?;
        debug!(user_id, event_id = id, kind, "event appended");
        if let Err(e) = self.aggregator.refresh_all() {
            warn!(event_id = id, error = %e, "aggregation after ingestion failed");
            return Err(e);
        }
        Ok(id)
    }

    fn insert(&self, user_id: &str, kind: &str, payload: &Payload) -> Result<i64> {
        if kind.trim().is_empty() {
            return Err(CoreError::InvalidPayload("event type must not be empty".into()));
        }
        let body = serde_json::to_string(payload)?;
        let now = Utc::now().timestamp_millis();
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO analytics_event (user_id, type, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, kind, body, now],
        )
        .map_err(|e| {
            if is_constraint(&e, SQLITE_CONSTRAINT_FOREIGNKEY) {
                CoreError::ForeignKeyViolation
            } else {
                CoreError::from(e)
            }
        })?;
        Ok(conn.last_insert_rowid())
    }

    /// Events for a user in insertion order, optionally filtered by type.
    pub fn list_for_user(&self, user_id: &str, kind: Option<&str>) -> Result<Vec<ActivityEvent>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, type, payload, created_at FROM analytics_event WHERE user_id = ?1 AND (?2 IS NULL OR type = ?2) ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![user_id, kind], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, i64>(4)?,
            ))
        })?;
        let mut v = Vec::new();
        for r in rows {
            let (id, user_id, kind, raw, created_at_ms) = r?;
            v.push(ActivityEvent {
                id,
                user_id,
                kind,
                payload: serde_json::from_str(&raw)?,
                created_at_ms,
            });
        }
        Ok(v)
    }
}
