//! JSON file subscription store
//!
//! Keeps every subscription in one document, `{"subscriptions": [...]}`.
//! Records are decoded one by one so a single bad entry neither hides the
//! others nor gets dropped on the next write.
//!
//! Every write re-reads and rewrites the whole document, so a cycle over N
//! subscriptions costs O(N^2) file I/O. That is fine for a few thousand
//! records. The write lock only serializes writers inside one process: a CLI
//! `subscribe` running while the service rewrites the file can be lost if it
//! lands between the service's read and its rename. Run management commands
//! against a stopped service, or move to a database-backed store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{StoredSubscription, Subscription, SubscriptionKey, SubscriptionStore};
use crate::alerts::AlertState;

#[derive(Debug, Default, Serialize, Deserialize)]
struct SubscriptionsFile {
    #[serde(default)]
    subscriptions: Vec<Value>,
}

fn record_matches(raw: &Value, key: &SubscriptionKey) -> bool {
    raw.get("userId").and_then(Value::as_str) == Some(key.user_id.as_str())
        && raw.get("nodeId").and_then(Value::as_str) == Some(key.node_id.as_str())
}

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<SubscriptionsFile> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            debug!("Store: {:?} does not exist, starting empty", self.path);
            return Ok(SubscriptionsFile::default());
        }
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read subscriptions file {:?}", self.path))?;
        if content.trim().is_empty() {
            return Ok(SubscriptionsFile::default());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse subscriptions file {:?}", self.path))
    }

    async fn write_file(&self, file: &SubscriptionsFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(file).context("Failed to serialize subscriptions")?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {:?}", tmp))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {:?}", self.path))?;
        Ok(())
    }

    pub async fn get(&self, key: &SubscriptionKey) -> Result<Option<Subscription>> {
        let file = self.read_file().await?;
        match file.subscriptions.into_iter().find(|raw| record_matches(raw, key)) {
            Some(raw) => Ok(Some(
                serde_json::from_value(raw).with_context(|| format!("Malformed record {}", key))?,
            )),
            None => Ok(None),
        }
    }

    /// Decoded subscriptions, skipping malformed records. Optionally only one user's.
    pub async fn list(&self, user_id: Option<&str>) -> Result<Vec<Subscription>> {
        let file = self.read_file().await?;
        Ok(file
            .subscriptions
            .into_iter()
            .filter_map(|raw| serde_json::from_value::<Subscription>(raw).ok())
            .filter(|s| user_id.map_or(true, |u| s.user_id == u))
            .collect())
    }

    /// Store a new subscription. Returns `false` if the key already exists.
    pub async fn insert(&self, subscription: &Subscription) -> Result<bool> {
        let key = subscription.key();
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file().await?;
        if file.subscriptions.iter().any(|raw| record_matches(raw, &key)) {
            return Ok(false);
        }
        let value = serde_json::to_value(subscription)
            .with_context(|| format!("Failed to encode subscription {}", key))?;
        file.subscriptions.push(value);
        self.write_file(&file).await?;
        info!("Store: added subscription {}", key);
        Ok(true)
    }

    /// Delete a subscription. Returns whether it existed.
    pub async fn remove(&self, key: &SubscriptionKey) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file().await?;
        let before = file.subscriptions.len();
        file.subscriptions.retain(|raw| !record_matches(raw, key));
        let removed = file.subscriptions.len() != before;
        if removed {
            self.write_file(&file).await?;
            info!("Store: removed subscription {}", key);
        }
        Ok(removed)
    }
}

#[async_trait]
impl SubscriptionStore for JsonFileStore {
    async fn list_all(&self) -> Result<BoxStream<'static, StoredSubscription>> {
        let file = self.read_file().await?;
        let entries = file.subscriptions.into_iter().map(|raw| -> StoredSubscription {
            let sub: Subscription =
                serde_json::from_value(raw).context("Failed to decode subscription record")?;
            Ok((sub.key(), sub))
        });
        Ok(stream::iter(entries).boxed())
    }

    async fn update_alert_state(
        &self,
        key: &SubscriptionKey,
        alert_state: &BTreeMap<String, AlertState>,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file().await?;
        let Some(record) = file
            .subscriptions
            .iter_mut()
            .find(|raw| record_matches(raw, key))
            .and_then(Value::as_object_mut)
        else {
            debug!("Store: {} no longer exists, not updating", key);
            return Ok(false);
        };
        let value = serde_json::to_value(alert_state)
            .with_context(|| format!("Failed to encode alert state for {}", key))?;
        record.insert("alertState".to_string(), value);
        self.write_file(&file).await?;
        Ok(true)
    }
}
