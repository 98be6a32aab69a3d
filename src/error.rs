//! Error taxonomy for the reconciliation core.
//!
//! Collaborators (Prometheus, Discord, the store) report `anyhow::Error`;
//! the core classifies them here so each failure is recovered at the right
//! level: per check, per intent, per subscription, or per cycle.

use thiserror::Error;

use crate::alerts::NotificationKind;
use crate::store::SubscriptionKey;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("check {check} failed for node {node_id}: {source:#}")]
    CheckEvaluation {
        check: &'static str,
        node_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("cannot render {check} messages for {key}: {reason}")]
    Render {
        check: &'static str,
        key: SubscriptionKey,
        reason: String,
    },

    #[error("failed to deliver {kind} notification for {check} to user {user_id}: {source:#}")]
    Delivery {
        kind: NotificationKind,
        check: &'static str,
        user_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to persist alert state for {key}: {source:#}")]
    SubscriptionWrite {
        key: SubscriptionKey,
        #[source]
        source: anyhow::Error,
    },

    #[error("malformed subscription record: {source:#}")]
    MalformedSubscription {
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to enumerate nodes: {0:#}")]
    NodeEnumeration(#[source] anyhow::Error),

    #[error("failed to enumerate subscriptions: {0:#}")]
    SubscriptionEnumeration(#[source] anyhow::Error),
}
