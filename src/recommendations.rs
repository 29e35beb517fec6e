//! Recommendation Aggregator.
//!
//! The cache is fully derived from `analytics_event`: one aggregation run
//! scans the whole log, ranks each user's referenced tracks and replaces
//! every cached list inside a single transaction. A failed run rolls back,
//! leaving the previous cache in place.

use crate::db::DbPool;
use crate::error::Result;
use crate::models::Payload;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Maximum length of a cached recommendation list.
pub const TOP_N: usize = 10;

/// Track identifier referenced by an event payload, if any.
/// Strings are taken as-is and numbers by their decimal form; anything else
/// (including an explicit null) does not count. Booleans, arrays and objects
/// are not stringified into ids, unlike a plain `->> 'track_id'` text read.
pub fn track_id_of(payload: &Payload) -> Option<String> {
    match payload.get("track_id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Order by descending count, then ascending id, and keep the first `TOP_N`.
pub fn rank(counts: &HashMap<String, u64>) -> Vec<String> {
    let mut ranked: Vec<(&String, &u64)> = counts.iter().collect();
    ranked.sort_by(|(a_id, a_n), (b_id, b_n)| b_n.cmp(a_n).then_with(|| a_id.cmp(b_id)));
    ranked
        .into_iter()
        .take(TOP_N)
        .map(|(id, _)| id.clone())
        .collect()
}

#[derive(Clone)]
pub struct RecommendationAggregator {
    pool: DbPool,
}

impl RecommendationAggregator {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Recompute the cache for every user with at least one event.
    /// Returns the number of users written.
    pub fn refresh_all(&self) -> Result<usize> {
        let mut conn = self.pool.get()?;
        // Write lock up front: a deferred SHARED -> RESERVED upgrade returns
        // BUSY immediately when another writer is pending.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut per_user: BTreeMap<String, HashMap<String, u64>> = BTreeMap::new();
        {
            let mut stmt = tx.prepare(
                "SELECT user_id, payload FROM analytics_event ORDER BY user_id ASC, created_at ASC, id ASC",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(r) = rows.next()? {
                let user_id: String = r.get(0)?;
                let raw: String = r.get(1)?;
                let counts = per_user.entry(user_id).or_default();
                match serde_json::from_str::<Payload>(&raw) {
                    Ok(p) => {
                        if let Some(track) = track_id_of(&p) {
                            *counts.entry(track).or_insert(0) += 1;
                        }
                    }
                    Err(e) => warn!(error = %e, "skipping unreadable event payload"),
                }
            }
        }

        for (user_id, counts) in &per_user {
            let top = rank(counts);
            debug!(user_id = %user_id, tracks = top.len(), "recommendations ranked");
            tx.execute(
                "INSERT INTO recommendation_cache (user_id, recommendations) VALUES (?1, ?2) ON CONFLICT(user_id) DO UPDATE SET recommendations = excluded.recommendations",
                params![user_id, serde_json::to_string(&top)?],
            )?;
        }
        tx.commit()?;
        info!(users = per_user.len(), "recommendation cache refreshed");
        Ok(per_user.len())
    }

    /// Cached list for `user_id`; empty when no run has seen the user yet.
    pub fn get(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(self.get_row(user_id)?.unwrap_or_default())
    }

    /// Like `get`, but distinguishes "no row" from "empty list".
    pub fn get_row(&self, user_id: &str) -> Result<Option<Vec<String>>> {
        let conn = self.pool.get()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT recommendations FROM recommendation_cache WHERE user_id = ?1",
                params![user_id],
                |r| r.get(0),
            )
            .optional()?;
        raw.map(|s| serde_json::from_str(&s)).transpose().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn counts(pairs: &[(&str, u64)]) -> HashMap<String, u64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn rank_breaks_ties_lexicographically() {
        let c = counts(&[("C", 1), ("B", 5), ("A", 5)]);
        assert_eq!(rank(&c), vec!["A", "B", "C"]);
    }

    #[test]
    fn rank_keeps_top_ten() {
        let c: HashMap<String, u64> = (0..15).map(|i| (format!("t{:02}", i), i as u64)).collect();
        let top = rank(&c);
        assert_eq!(top.len(), TOP_N);
        assert_eq!(top[0], "t14");
        assert_eq!(top[9], "t05");
    }

    #[test]
    fn track_id_accepts_strings_and_numbers_only() {
        let p = |v: Value| v.as_object().cloned().unwrap();
        assert_eq!(track_id_of(&p(json!({"track_id": "abc"}))), Some("abc".into()));
        assert_eq!(track_id_of(&p(json!({"track_id": 42}))), Some("42".into()));
        assert_eq!(track_id_of(&p(json!({"track_id": null}))), None);
        assert_eq!(track_id_of(&p(json!({"duration": 180}))), None);
        assert_eq!(track_id_of(&p(json!({"track_id": true}))), None);
        assert_eq!(track_id_of(&p(json!({"track_id": ["a"]}))), None);
        assert_eq!(track_id_of(&p(json!({"track_id": {"id": "a"}}))), None);
    }
}
