//! Subscription management commands (`subscribe`, `unsubscribe`, `info`).

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use crate::alerts::AlertState;
use crate::metrics::NodeDirectory;
use crate::store::{JsonFileStore, Subscription, SubscriptionKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SubscribeOutcome {
    Created { node_type: String },
    AlreadySubscribed,
    UnknownNode,
}

/// One row of `info` output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    pub user_id: String,
    pub node_id: String,
    pub node_type: String,
    pub subscribed_at: DateTime<Utc>,
    pub active_alerts: Vec<String>,
    pub alert_state: BTreeMap<String, AlertState>,
}

impl From<Subscription> for SubscriptionInfo {
    fn from(sub: Subscription) -> Self {
        let active_alerts = sub.active_alerts().into_iter().map(str::to_string).collect();
        Self {
            user_id: sub.user_id,
            node_id: sub.node_id,
            node_type: sub.node_type,
            subscribed_at: sub.subscribed_at,
            active_alerts,
            alert_state: sub.alert_state,
        }
    }
}

fn key_from_args(user_id: &str, node_id: &str) -> Result<SubscriptionKey> {
    let (user_id, node_id) = (user_id.trim(), node_id.trim());
    if user_id.is_empty() || node_id.is_empty() {
        bail!("user id and node id must not be empty");
    }
    Ok(SubscriptionKey::new(user_id, node_id))
}

/// Subscribe a user to a node the metrics backend currently knows about.
pub async fn subscribe(
    store: &JsonFileStore,
    nodes: &dyn NodeDirectory,
    user_id: &str,
    node_id: &str,
) -> Result<SubscribeOutcome> {
    let key = key_from_args(user_id, node_id)?;
    if store.get(&key).await?.is_some() {
        return Ok(SubscribeOutcome::AlreadySubscribed);
    }

    let known = nodes
        .list_known_node_ids()
        .await
        .context("Failed to list known nodes")?;
    if !known.iter().any(|id| id == &key.node_id) {
        return Ok(SubscribeOutcome::UnknownNode);
    }

    let node_type = nodes.node_type(&key.node_id).await?.unwrap_or_default();
    let subscription = Subscription::new(&key, node_type.clone());
    if !store.insert(&subscription).await? {
        return Ok(SubscribeOutcome::AlreadySubscribed);
    }
    info!("Commands: subscribed {} (type {:?})", key, node_type);
    Ok(SubscribeOutcome::Created { node_type })
}

/// Remove a subscription. Returns whether it existed.
pub async fn unsubscribe(store: &JsonFileStore, user_id: &str, node_id: &str) -> Result<bool> {
    let key = key_from_args(user_id, node_id)?;
    store.remove(&key).await
}

pub async fn info(store: &JsonFileStore, user_id: Option<&str>) -> Result<Vec<SubscriptionInfo>> {
    let subs = store.list(user_id).await?;
    Ok(subs.into_iter().map(SubscriptionInfo::from).collect())
}
