//! Node monitoring
//!
//! Runs every registered check against every known node. A check that fails
//! to evaluate is logged and left out of the results, so the alert state for
//! that check is carried over unchanged this cycle.

use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::alerts::{CheckKind, CheckRegistry, CheckResult, Thresholds};
use crate::error::AlertError;
use crate::metrics::NodeMetrics;

/// Results of one evaluation pass, keyed by node id.
#[derive(Debug, Default)]
pub struct Evaluation {
    /// Only nodes with at least one successful check appear here.
    pub results: HashMap<String, Vec<(CheckKind, CheckResult)>>,
    pub checks_run: usize,
    pub checks_failed: usize,
}

impl Evaluation {
    pub fn for_node(&self, node_id: &str) -> Option<&[(CheckKind, CheckResult)]> {
        self.results.get(node_id).map(Vec::as_slice)
    }
}

/// Evaluate every (check, node) pair, at most `concurrency` pairs at a time.
///
/// Results for one node come back in registry order.
pub async fn evaluate_nodes(
    nodes: &[String],
    registry: &CheckRegistry,
    metrics: &dyn NodeMetrics,
    thresholds: &Thresholds,
    concurrency: usize,
) -> Evaluation {
    let started = Instant::now();
    let pairs = nodes
        .iter()
        .flat_map(|node_id| registry.iter().enumerate().map(move |(i, check)| (node_id, i, check)));
    let outcomes: Vec<_> = stream::iter(pairs)
        .map(|(node_id, i, check)| async move {
            let outcome = check.evaluate(metrics, node_id, thresholds).await;
            (node_id, i, check, outcome)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut evaluation = Evaluation::default();
    let mut ordered: HashMap<String, Vec<(usize, CheckKind, CheckResult)>> = HashMap::new();
    for (node_id, i, check, outcome) in outcomes {
        evaluation.checks_run += 1;
        match outcome {
            Ok(result) => ordered.entry(node_id.clone()).or_default().push((i, check, result)),
            Err(source) => {
                evaluation.checks_failed += 1;
                let err = AlertError::CheckEvaluation {
                    check: check.name(),
                    node_id: node_id.clone(),
                    source,
                };
                warn!("Monitor: {}", err);
            }
        }
    }
    for (node_id, mut results) in ordered {
        results.sort_by_key(|(i, _, _)| *i);
        let results = results.into_iter().map(|(_, check, result)| (check, result)).collect();
        evaluation.results.insert(node_id, results);
    }
    for node_id in nodes.iter().filter(|n| !evaluation.results.contains_key(*n)) {
        debug!("Monitor: no results for node {}", node_id);
    }

    info!(
        "Monitor: evaluated {} checks on {} nodes ({} failed) in {}ms",
        evaluation.checks_run,
        nodes.len(),
        evaluation.checks_failed,
        started.elapsed().as_millis()
    );
    evaluation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NodeQuery;
    use anyhow::{bail, Result};
    use async_trait::async_trait;

    /// Node `bad` fails every query; others report healthy numbers.
    struct SplitMetrics;

    #[async_trait]
    impl NodeMetrics for SplitMetrics {
        async fn node_value(&self, node_id: &str, query: &NodeQuery) -> Result<Option<f64>> {
            if node_id == "bad" {
                bail!("connection refused");
            }
            Ok(Some(match query {
                NodeQuery::HeadHeight => 100.0,
                _ => 10.0,
            }))
        }

        async fn highest_head(&self) -> Result<Option<f64>> {
            Ok(Some(100.0))
        }
    }

    #[tokio::test]
    async fn test_failed_node_is_left_out() {
        let nodes = vec!["good".to_string(), "bad".to_string()];
        let registry = CheckRegistry::all();
        let evaluation =
            evaluate_nodes(&nodes, &registry, &SplitMetrics, &Thresholds::default(), 2).await;

        assert_eq!(evaluation.checks_run, 2 * registry.len());
        assert_eq!(evaluation.checks_failed, registry.len());
        assert!(evaluation.for_node("bad").is_none());

        let good = evaluation.for_node("good").unwrap();
        let order: Vec<CheckKind> = good.iter().map(|(c, _)| *c).collect();
        assert_eq!(order, registry.iter().collect::<Vec<_>>());
        assert!(good.iter().all(|(_, r)| !r.fired));
    }

    #[tokio::test]
    async fn test_no_nodes() {
        let evaluation =
            evaluate_nodes(&[], &CheckRegistry::all(), &SplitMetrics, &Thresholds::default(), 0)
                .await;
        assert_eq!(evaluation.checks_run, 0);
        assert!(evaluation.results.is_empty());
    }
}
