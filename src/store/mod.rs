//! Subscription storage
//!
//! The reconciliation core only needs a restartable read-all and an atomic
//! per-key update of the alert state; see [`SubscriptionStore`]. Creating and
//! deleting subscriptions is left to the adapters and the CLI.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::alerts::AlertState;

pub mod json;
#[cfg(test)]
pub mod memory;

pub use json::JsonFileStore;
#[cfg(test)]
pub use memory::MemoryStore;

/// Unique key of a subscription: one user watching one node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionKey {
    pub user_id: String,
    pub node_id: String,
}

impl SubscriptionKey {
    pub fn new(user_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            node_id: node_id.into(),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.node_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub user_id: String,
    pub node_id: String,
    /// Captured when subscribing; may go stale.
    #[serde(default)]
    pub node_type: String,
    pub subscribed_at: DateTime<Utc>,
    /// Check name to hysteresis state.
    #[serde(default)]
    pub alert_state: BTreeMap<String, AlertState>,
}

impl Subscription {
    pub fn new(key: &SubscriptionKey, node_type: impl Into<String>) -> Self {
        Self {
            user_id: key.user_id.clone(),
            node_id: key.node_id.clone(),
            node_type: node_type.into(),
            subscribed_at: Utc::now(),
            alert_state: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(&self.user_id, &self.node_id)
    }

    /// Names of checks currently notified-active.
    pub fn active_alerts(&self) -> Vec<&str> {
        self.alert_state
            .iter()
            .filter(|(_, s)| s.is_active)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// One entry from [`SubscriptionStore::list_all`]; an `Err` is a record that
/// could not be decoded and should be skipped.
pub type StoredSubscription = Result<(SubscriptionKey, Subscription)>;

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Stream every subscription. An outer `Err` means the store itself is
    /// unreachable; inner `Err`s are individual bad records.
    async fn list_all(&self) -> Result<BoxStream<'static, StoredSubscription>>;

    /// Atomically replace the alert state of an existing record.
    ///
    /// Returns `Ok(false)` when `key` is no longer stored; the record is not
    /// created again.
    async fn update_alert_state(
        &self,
        key: &SubscriptionKey,
        alert_state: &BTreeMap<String, AlertState>,
    ) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_tolerates_missing_state() {
        let raw = r#"{
            "userId": "42",
            "nodeId": "12D3KooWabc",
            "subscribedAt": "2026-01-02T03:04:05Z"
        }"#;
        let sub: Subscription = serde_json::from_str(raw).unwrap();
        assert!(sub.alert_state.is_empty());
        assert_eq!(sub.node_type, "");
        assert_eq!(sub.key(), SubscriptionKey::new("42", "12D3KooWabc"));
    }

    #[test]
    fn test_active_alerts() {
        let mut sub = Subscription::new(&SubscriptionKey::new("u", "n"), "bridge");
        sub.alert_state.insert(
            "OutOfSync".to_string(),
            AlertState {
                consecutive_fire_count: 4,
                is_active: true,
            },
        );
        sub.alert_state.insert(
            "LowPeersCount".to_string(),
            AlertState {
                consecutive_fire_count: 1,
                is_active: false,
            },
        );
        assert_eq!(sub.active_alerts(), vec!["OutOfSync"]);
    }
}
