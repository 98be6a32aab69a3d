//! Reconciliation engine
//!
//! [`reconcile`] is the pure part: previous alert state plus this cycle's
//! results in, next alert state plus notification intents out.
//! [`ReconciliationEngine::process`] wraps it with delivery and the single
//! store write per subscription, in that order.

use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::channels::Notifier;
use super::{AlertState, CheckKind, CheckResult, NotificationIntent, NotificationKind, Thresholds};
use crate::error::AlertError;
use crate::store::{Subscription, SubscriptionKey, SubscriptionStore};

/// Inputs that are the same for every subscription in a cycle.
#[derive(Debug, Clone)]
pub struct ReconcilePolicy {
    pub activation_threshold: u32,
    pub network_label: String,
    pub thresholds: Thresholds,
}

/// Result of reconciling one subscription, before anything is sent or written.
#[derive(Debug)]
pub struct Reconciliation {
    pub alert_state: BTreeMap<String, AlertState>,
    pub intents: Vec<NotificationIntent>,
    pub render_failures: Vec<AlertError>,
}

/// Apply one cycle of results to a subscription's alert state.
///
/// Checks without a result keep their previous state untouched. Identical
/// inputs always give identical outputs.
pub fn reconcile(
    key: &SubscriptionKey,
    subscription: &Subscription,
    results: &[(CheckKind, CheckResult)],
    policy: &ReconcilePolicy,
) -> Reconciliation {
    let mut alert_state = subscription.alert_state.clone();
    let mut intents = Vec::new();
    let mut render_failures = Vec::new();

    for (check, result) in results {
        let previous = alert_state.get(check.name()).copied().unwrap_or_default();
        let (next, transition) = previous.advance(result.fired, policy.activation_threshold);
        alert_state.insert(check.name().to_string(), next);

        trace!(
            "Engine: {} {} fired={} value={} count={} active={} ({:?})",
            key,
            check,
            result.fired,
            result.value,
            next.consecutive_fire_count,
            next.is_active,
            transition
        );

        let Some(kind) = transition.notification() else {
            continue;
        };

        match check.render(
            &key.user_id,
            &key.node_id,
            &subscription.node_type,
            &policy.network_label,
            &policy.thresholds,
        ) {
            Ok(messages) => intents.push(NotificationIntent {
                user_id: key.user_id.clone(),
                check: check.name(),
                kind,
                message: messages.into_kind(kind),
            }),
            Err(reason) => {
                let err = AlertError::Render {
                    check: check.name(),
                    key: key.clone(),
                    reason,
                };
                warn!("Engine: {}", err);
                render_failures.push(err);
            }
        }
    }

    Reconciliation {
        alert_state,
        intents,
        render_failures,
    }
}

/// What happened to one subscription in one cycle.
#[derive(Debug, Default)]
pub struct SubscriptionReport {
    pub fired: usize,
    pub resolved: usize,
    pub delivered: usize,
    pub delivery_failures: Vec<AlertError>,
    pub render_failures: Vec<AlertError>,
    pub write_error: Option<AlertError>,
    /// The record was deleted after it was listed; nothing was written.
    pub removed: bool,
}

pub struct ReconciliationEngine {
    policy: ReconcilePolicy,
    store: Arc<dyn SubscriptionStore>,
    notifier: Arc<dyn Notifier>,
}

impl ReconciliationEngine {
    pub fn new(
        policy: ReconcilePolicy,
        store: Arc<dyn SubscriptionStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            policy,
            store,
            notifier,
        }
    }

    pub fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    /// Reconcile, attempt every notification, then write the new state once.
    ///
    /// A failed delivery does not hold back the state change: the alert is
    /// still considered active (or resolved) and is not resent. Only the
    /// alert state is written; a subscription deleted meanwhile stays deleted.
    pub async fn process(
        &self,
        key: &SubscriptionKey,
        subscription: &Subscription,
        results: &[(CheckKind, CheckResult)],
    ) -> SubscriptionReport {
        let Reconciliation {
            alert_state,
            intents,
            render_failures,
        } = reconcile(key, subscription, results, &self.policy);

        let mut report = SubscriptionReport {
            render_failures,
            ..Default::default()
        };
        for intent in &intents {
            match intent.kind {
                NotificationKind::Fire => report.fired += 1,
                NotificationKind::Resolve => report.resolved += 1,
            }
        }

        let outcomes = join_all(intents.iter().map(|intent| self.notifier.send_to_user(intent))).await;
        for (intent, outcome) in intents.iter().zip(outcomes) {
            match outcome {
                Ok(()) => {
                    report.delivered += 1;
                    info!(
                        "Engine: sent {} {} to user {} via {}",
                        intent.kind,
                        intent.check,
                        intent.user_id,
                        self.notifier.name()
                    );
                }
                Err(source) => {
                    let err = AlertError::Delivery {
                        kind: intent.kind,
                        check: intent.check,
                        user_id: intent.user_id.clone(),
                        source,
                    };
                    warn!("Engine: {}", err);
                    report.delivery_failures.push(err);
                }
            }
        }

        match self.store.update_alert_state(key, &alert_state).await {
            Ok(true) => debug!(
                "Engine: saved state for {} ({} fired, {} resolved)",
                key, report.fired, report.resolved
            ),
            Ok(false) => {
                info!("Engine: {} was removed during the cycle, state dropped", key);
                report.removed = true;
            }
            Err(source) => {
                report.write_error = Some(AlertError::SubscriptionWrite {
                    key: key.clone(),
                    source,
                });
            }
        }
        report
    }
}
