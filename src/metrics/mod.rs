//! Node metrics module
//!
//! The checks never talk to the metrics backend directly. They go through
//! [`NodeMetrics`], and the cycle enumerates nodes through [`NodeDirectory`].
//! [`prometheus::PrometheusClient`] implements both against a Prometheus
//! HTTP API; tests use in-memory fakes.

use anyhow::Result;
use async_trait::async_trait;

pub mod cache;
pub mod prometheus;

pub use cache::TtlCache;
pub use prometheus::PrometheusClient;

/// Per-node series the checks read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeQuery {
    /// Peers found by full-node discovery.
    FullPeers,
    /// Peers found by archival discovery.
    ArchivalPeers,
    /// Subjective head height.
    HeadHeight,
    /// Head height increase over the given range (PromQL duration, e.g. `10m`).
    HeadIncrease(String),
}

impl NodeQuery {
    /// PromQL for this series, selecting the node by `label`.
    pub fn promql(&self, label: &str, node_id: &str) -> String {
        let selector = format!("{{{}=\"{}\"}}", label, node_id);
        match self {
            NodeQuery::FullPeers => format!("full_discovery_amount_of_peers{}", selector),
            NodeQuery::ArchivalPeers => {
                format!("archival_discovery_amount_of_peers{}", selector)
            }
            NodeQuery::HeadHeight => format!("hdr_sync_subjective_head_gauge{}", selector),
            NodeQuery::HeadIncrease(range) => format!(
                "increase(hdr_sync_subjective_head_gauge{}[{}])",
                selector, range
            ),
        }
    }
}

/// Metric lookups used by check evaluation.
#[async_trait]
pub trait NodeMetrics: Send + Sync {
    /// Latest value of `query` for `node_id`, `None` when the series is absent.
    async fn node_value(&self, node_id: &str, query: &NodeQuery) -> Result<Option<f64>>;

    /// Highest head height reported by any node on the configured network.
    async fn highest_head(&self) -> Result<Option<f64>>;
}

/// Enumerates the nodes eligible for checking.
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    async fn list_known_node_ids(&self) -> Result<Vec<String>>;

    /// Node type (`bridge`, `full`, `light`, ...) if the backend can tell.
    async fn node_type(&self, _node_id: &str) -> Result<Option<String>> {
        Ok(None)
    }
}
