//! One reconciliation cycle
//!
//! Enumerate nodes, evaluate checks, then reconcile every subscription
//! against its node's results. The runner holds all collaborators behind
//! trait objects so the scheduler, the `once` command and the tests drive
//! the exact same code.

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alerts::channels::Notifier;
use crate::alerts::engine::{ReconcilePolicy, ReconciliationEngine, SubscriptionReport};
use crate::alerts::CheckRegistry;
use crate::error::AlertError;
use crate::logging::preview_ids;
use crate::metrics::{NodeDirectory, NodeMetrics};
use crate::monitors::{evaluate_nodes, Evaluation};
use crate::store::{SubscriptionStore, StoredSubscription};

/// Counters for a cycle that ran to the end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    pub nodes: usize,
    pub checks_run: usize,
    pub checks_failed: usize,
    pub subscriptions_processed: usize,
    pub subscriptions_skipped: usize,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
    pub render_failures: usize,
    pub subscription_errors: usize,
    /// Set when shutdown stopped the cycle before every subscription was visited.
    pub cancelled: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CycleOutcome {
    Completed(CycleStats),
    Failed { error: String, duration_ms: u64 },
    /// Another cycle was still running on this runner.
    Skipped,
}

impl CycleOutcome {
    pub fn stats(&self) -> Option<&CycleStats> {
        match self {
            CycleOutcome::Completed(stats) => Some(stats),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Concurrency {
    pub evaluation: usize,
    pub reconcile: usize,
}

impl Default for Concurrency {
    fn default() -> Self {
        Self {
            evaluation: 8,
            reconcile: 4,
        }
    }
}

enum Visit {
    Processed(SubscriptionReport),
    Skipped,
    Malformed,
    Cancelled,
}

pub struct CycleRunner {
    registry: CheckRegistry,
    metrics: Arc<dyn NodeMetrics>,
    nodes: Arc<dyn NodeDirectory>,
    store: Arc<dyn SubscriptionStore>,
    engine: ReconciliationEngine,
    concurrency: Concurrency,
    running: Mutex<()>,
    cancel: CancellationToken,
}

impl CycleRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: CheckRegistry,
        metrics: Arc<dyn NodeMetrics>,
        nodes: Arc<dyn NodeDirectory>,
        store: Arc<dyn SubscriptionStore>,
        notifier: Arc<dyn Notifier>,
        policy: ReconcilePolicy,
        concurrency: Concurrency,
        cancel: CancellationToken,
    ) -> Self {
        let engine = ReconciliationEngine::new(policy, store.clone(), notifier);
        Self {
            registry,
            metrics,
            nodes,
            store,
            engine,
            concurrency,
            running: Mutex::new(()),
            cancel,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run one cycle. Never panics and never returns early without an outcome.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Ok(_running) = self.running.try_lock() else {
            warn!("Cycle: previous cycle still running, skipping");
            return CycleOutcome::Skipped;
        };

        let started = Instant::now();
        match self.run(started).await {
            Ok(stats) => {
                info!(
                    "Cycle: done in {}ms: {} nodes, {} subscriptions ({} skipped, {} errors), {} sent, {} failed",
                    stats.duration_ms,
                    stats.nodes,
                    stats.subscriptions_processed,
                    stats.subscriptions_skipped,
                    stats.subscription_errors,
                    stats.notifications_sent,
                    stats.notifications_failed
                );
                CycleOutcome::Completed(stats)
            }
            Err(err) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                error!("Cycle: aborted after {}ms: {}", duration_ms, err);
                CycleOutcome::Failed {
                    error: err.to_string(),
                    duration_ms,
                }
            }
        }
    }

    async fn run(&self, started: Instant) -> Result<CycleStats, AlertError> {
        let nodes = self
            .nodes
            .list_known_node_ids()
            .await
            .map_err(AlertError::NodeEnumeration)?;
        debug!("Cycle: {} nodes {}", nodes.len(), preview_ids(&nodes, 3));

        let evaluation = evaluate_nodes(
            &nodes,
            &self.registry,
            self.metrics.as_ref(),
            &self.engine.policy().thresholds,
            self.concurrency.evaluation,
        )
        .await;

        // Enumerate everything before the first write.
        let entries: Vec<StoredSubscription> = self
            .store
            .list_all()
            .await
            .map_err(AlertError::SubscriptionEnumeration)?
            .collect()
            .await;

        let visits: Vec<Visit> = stream::iter(entries)
            .map(|entry| self.visit(entry, &evaluation))
            .buffer_unordered(self.concurrency.reconcile.max(1))
            .collect()
            .await;

        let mut stats = CycleStats {
            nodes: nodes.len(),
            checks_run: evaluation.checks_run,
            checks_failed: evaluation.checks_failed,
            ..Default::default()
        };
        for visit in visits {
            match visit {
                Visit::Processed(report) => {
                    if report.removed {
                        stats.subscriptions_skipped += 1;
                    } else {
                        stats.subscriptions_processed += 1;
                    }
                    stats.notifications_sent += report.delivered;
                    stats.notifications_failed += report.delivery_failures.len();
                    stats.render_failures += report.render_failures.len();
                    if report.write_error.is_some() {
                        stats.subscription_errors += 1;
                    }
                }
                Visit::Skipped => stats.subscriptions_skipped += 1,
                Visit::Malformed => stats.subscription_errors += 1,
                Visit::Cancelled => stats.cancelled = true,
            }
        }
        stats.duration_ms = started.elapsed().as_millis() as u64;
        Ok(stats)
    }

    async fn visit(&self, entry: StoredSubscription, evaluation: &Evaluation) -> Visit {
        if self.cancel.is_cancelled() {
            return Visit::Cancelled;
        }
        let (key, subscription) = match entry {
            Ok(entry) => entry,
            Err(source) => {
                warn!("Cycle: {}", AlertError::MalformedSubscription { source });
                return Visit::Malformed;
            }
        };
        let Some(results) = evaluation.for_node(&key.node_id) else {
            debug!("Cycle: no results for {}, leaving state as is", key);
            return Visit::Skipped;
        };

        let report = self.engine.process(&key, &subscription, results).await;
        if let Some(err) = &report.write_error {
            error!("Cycle: {}", err);
        }
        Visit::Processed(report)
    }
}
