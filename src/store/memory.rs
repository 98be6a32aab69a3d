//! In-memory subscription store with failure injection, for tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use super::{StoredSubscription, Subscription, SubscriptionKey, SubscriptionStore};
use crate::alerts::AlertState;

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<SubscriptionKey, Subscription>>,
    failing_writes: Mutex<HashSet<SubscriptionKey>>,
    unavailable: Mutex<bool>,
    writes: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, subscription: Subscription) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(subscription.key(), subscription);
    }

    pub fn remove(&self, key: &SubscriptionKey) -> bool {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.remove(key).is_some()
    }

    pub fn get(&self, key: &SubscriptionKey) -> Option<Subscription> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.get(key).cloned()
    }

    /// Make every write to `key` fail until cleared.
    pub fn fail_writes_for(&self, key: SubscriptionKey) {
        let mut failing = self.failing_writes.lock().unwrap_or_else(|e| e.into_inner());
        failing.insert(key);
    }

    /// Make `list_all` fail as if the backend were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap_or_else(|e| e.into_inner()) = unavailable;
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn list_all(&self) -> Result<BoxStream<'static, StoredSubscription>> {
        if *self.unavailable.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(anyhow!("store unavailable"));
        }
        let snapshot: Vec<StoredSubscription> = self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| Ok((k.clone(), v.clone())))
            .collect();
        Ok(stream::iter(snapshot).boxed())
    }

    async fn update_alert_state(
        &self,
        key: &SubscriptionKey,
        alert_state: &BTreeMap<String, AlertState>,
    ) -> Result<bool> {
        if self
            .failing_writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
        {
            return Err(anyhow!("write rejected for {}", key));
        }
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let Some(record) = records.get_mut(key) else {
            return Ok(false);
        };
        record.alert_state = alert_state.clone();
        *self.writes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(true)
    }
}
