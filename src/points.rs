// Point ledger: read-merge-write of boss points on top of a DocumentStore.
//
// All writes go through one async mutex so concurrent awards never lose
// updates. A failed write is retried once before the error is reported.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::chat::UserId;
use crate::db::{Document, DocumentStore, StoreError};
use crate::metrics;

/// Document key holding `{ "<user_id>": points }`.
pub const POINTS_KEY: &str = "boss_points";

/// Old and new balance for one user after an award.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PointChange {
    pub old: i64,
    pub new: i64,
}

pub struct PointLedger<S> {
    store: S,
    write_lock: Mutex<()>,
}

impl<S: DocumentStore> PointLedger<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Add `awards` to each user's balance and return the before/after totals.
    pub async fn award_points(
        &self,
        awards: &BTreeMap<UserId, i64>,
    ) -> Result<BTreeMap<UserId, PointChange>, StoreError> {
        let _guard = self.write_lock.lock().await;

        match self.merge_awards(awards).await {
            Ok(changes) => Ok(changes),
            Err(e) => {
                tracing::warn!("Point award failed, retrying once: {e}");
                metrics::STORE_ERRORS_TOTAL.inc();
                let changes = self.merge_awards(awards).await.inspect_err(|e| {
                    tracing::error!("Point award failed after retry: {e}");
                    metrics::STORE_ERRORS_TOTAL.inc();
                })?;
                Ok(changes)
            }
        }
    }

    /// Current balance for a user (0 if never awarded).
    pub async fn balance(&self, user: UserId) -> Result<i64, StoreError> {
        let doc = self.store.load_document(POINTS_KEY).await?;
        Ok(doc
            .as_ref()
            .and_then(|d| d.get(&user.to_string()))
            .map(points_value)
            .unwrap_or(0))
    }

    async fn merge_awards(
        &self,
        awards: &BTreeMap<UserId, i64>,
    ) -> Result<BTreeMap<UserId, PointChange>, StoreError> {
        let mut doc: Document = self.store.load_document(POINTS_KEY).await?.unwrap_or_default();

        let mut changes = BTreeMap::new();
        for (&user, &add) in awards {
            let key = user.to_string();
            let old = doc.get(&key).map(points_value).unwrap_or(0);
            let new = old + add;
            doc.insert(key, Value::from(new));
            changes.insert(user, PointChange { old, new });
        }

        self.store.save_document(POINTS_KEY, &doc).await?;

        let total: i64 = awards.values().sum();
        metrics::POINTS_AWARDED_TOTAL.inc_by(total.max(0) as u64);
        Ok(changes)
    }
}

/// Stored balances may be numbers or numeric strings; anything else counts as 0.
fn points_value(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}
