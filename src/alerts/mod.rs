//! Alert system module
//!
//! Named health checks, the per-subscription hysteresis state they drive,
//! and the notification intents that come out of a reconciliation.
//! Delivery is channel-agnostic: see [`channels::Notifier`].

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod channels;
pub mod engine;
pub mod hysteresis;
pub mod rules;

pub use engine::{reconcile, Reconciliation};
pub use rules::{CheckKind, CheckRegistry, Thresholds};

/// Observed metric value backing a check decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CheckValue {
    Number(f64),
    Text(String),
}

impl Default for CheckValue {
    fn default() -> Self {
        CheckValue::Number(0.0)
    }
}

impl fmt::Display for CheckValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckValue::Number(n) => write!(f, "{}", n),
            CheckValue::Text(s) => f.write_str(s),
        }
    }
}

/// Outcome of evaluating one check against one node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CheckResult {
    pub fired: bool,
    pub value: CheckValue,
}

impl CheckResult {
    pub fn new(fired: bool, value: Option<f64>) -> Self {
        Self {
            fired,
            value: value.map(CheckValue::Number).unwrap_or_default(),
        }
    }
}

/// Persisted hysteresis state for one check of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertState {
    pub consecutive_fire_count: u32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Fire,
    Resolve,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Fire => f.write_str("fire"),
            NotificationKind::Resolve => f.write_str("resolve"),
        }
    }
}

/// Display payload: a title and a markdown body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub title: String,
    pub text: String,
}

/// The pair of messages a check renders for one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessages {
    pub fire: Message,
    pub resolve: Message,
}

impl AlertMessages {
    pub fn into_kind(self, kind: NotificationKind) -> Message {
        match kind {
            NotificationKind::Fire => self.fire,
            NotificationKind::Resolve => self.resolve,
        }
    }
}

/// A notification decided within one cycle. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationIntent {
    pub user_id: String,
    pub check: &'static str,
    pub kind: NotificationKind,
    pub message: Message,
}
