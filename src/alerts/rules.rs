//! Health check definitions
//!
//! Each check is a variant of [`CheckKind`]. Evaluation and message rendering
//! are resolved by matching on the variant, so nothing but the name ever
//! needs to be stored next to a subscription.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{AlertMessages, CheckResult, Message};
use crate::metrics::{NodeMetrics, NodeQuery};

/// Tunables the checks compare against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Fewer connected full-discovery peers than this fires `LowPeersCount`.
    pub connected_peers: f64,
    /// Lagging the network's highest head by more than this fires `OutOfSync`.
    pub out_of_sync_height: f64,
    /// Range over which `StalledBlocks` expects the head to move.
    pub sync_time_window: String,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            connected_peers: 2.0,
            out_of_sync_height: 50.0,
            sync_time_window: "10m".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckKind {
    LowPeersCount,
    StalledBlocks,
    OutOfSync,
    NoArchivalPeers,
}

impl CheckKind {
    pub const ALL: [CheckKind; 4] = [
        CheckKind::LowPeersCount,
        CheckKind::StalledBlocks,
        CheckKind::OutOfSync,
        CheckKind::NoArchivalPeers,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CheckKind::LowPeersCount => "LowPeersCount",
            CheckKind::StalledBlocks => "StalledBlocks",
            CheckKind::OutOfSync => "OutOfSync",
            CheckKind::NoArchivalPeers => "NoArchivalPeers",
        }
    }

    /// Evaluate against live metrics. A missing series counts as unhealthy.
    pub async fn evaluate(
        &self,
        metrics: &dyn NodeMetrics,
        node_id: &str,
        thresholds: &Thresholds,
    ) -> Result<CheckResult> {
        match self {
            CheckKind::LowPeersCount => {
                let peers = metrics.node_value(node_id, &NodeQuery::FullPeers).await?;
                let fired = peers.map_or(true, |p| p < thresholds.connected_peers);
                Ok(CheckResult::new(fired, peers))
            }
            CheckKind::StalledBlocks => {
                let query = NodeQuery::HeadIncrease(thresholds.sync_time_window.clone());
                let increase = metrics.node_value(node_id, &query).await?;
                let fired = increase.map_or(true, |v| v == 0.0);
                Ok(CheckResult::new(fired, increase))
            }
            CheckKind::OutOfSync => {
                let highest = metrics.highest_head().await?;
                let height = metrics.node_value(node_id, &NodeQuery::HeadHeight).await?;
                let fired = match (highest, height) {
                    (Some(highest), Some(height)) => {
                        highest - height > thresholds.out_of_sync_height
                    }
                    _ => true,
                };
                Ok(CheckResult::new(fired, height))
            }
            CheckKind::NoArchivalPeers => {
                let peers = metrics.node_value(node_id, &NodeQuery::ArchivalPeers).await?;
                let fired = peers.map_or(true, |p| p < 1.0);
                Ok(CheckResult::new(fired, peers))
            }
        }
    }

    /// Render the fire and resolve messages for one subscriber.
    pub fn render(
        &self,
        user_id: &str,
        node_id: &str,
        node_type: &str,
        network_label: &str,
        thresholds: &Thresholds,
    ) -> Result<AlertMessages, String> {
        if user_id.trim().is_empty() {
            return Err("empty user id".to_string());
        }
        if node_id.trim().is_empty() {
            return Err("empty node id".to_string());
        }

        let label = match node_type.trim() {
            "" => network_label.to_string(),
            t => format!("{} {}", network_label, t),
        };
        let warn_head = format!("**<@{}> take action! Your `{}` node**", user_id, label);
        let ok_head = format!("**<@{}> you can chillin' now! Your `{}` node**", user_id, label);

        let (topic, problem, recovery) = match self {
            CheckKind::LowPeersCount => (
                "Low Peer Count",
                format!("has fewer than {} connected peers.", thresholds.connected_peers),
                format!("now has more than {} connected peers.", thresholds.connected_peers),
            ),
            CheckKind::StalledBlocks => (
                "Stalled Blocks",
                "has stalled blocks.".to_string(),
                "has no stalled blocks now.".to_string(),
            ),
            CheckKind::OutOfSync => (
                "Node Sync",
                "is out of sync.".to_string(),
                "is synced now.".to_string(),
            ),
            CheckKind::NoArchivalPeers => (
                "No Archival Peers",
                "has no archival peers.".to_string(),
                "now has archival peers.".to_string(),
            ),
        };

        Ok(AlertMessages {
            fire: Message {
                title: format!("**Warning!** {} Alert", topic),
                text: format!("{}\n\n**`{}`** {}", warn_head, node_id, problem),
            },
            resolve: Message {
                title: format!("**Resolved!** {} Alert", topic),
                text: format!("{}\n\n**`{}`** {}", ok_head, node_id, recovery),
            },
        })
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CheckKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CheckKind::ALL
            .into_iter()
            .find(|c| c.name() == s.trim())
            .ok_or_else(|| format!("unknown check: {}", s))
    }
}

/// Ordered, name-unique set of checks run every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRegistry {
    checks: Vec<CheckKind>,
}

impl CheckRegistry {
    pub fn all() -> Self {
        Self {
            checks: CheckKind::ALL.to_vec(),
        }
    }

    /// Build from configured names. An empty list selects every check.
    pub fn from_names(names: &[String]) -> Result<Self> {
        if names.is_empty() {
            return Ok(Self::all());
        }
        let mut checks = Vec::with_capacity(names.len());
        for name in names {
            let kind = CheckKind::from_str(name).map_err(|e| anyhow::anyhow!(e))?;
            if checks.contains(&kind) {
                bail!("check {} listed twice", kind);
            }
            checks.push(kind);
        }
        Ok(Self { checks })
    }

    pub fn iter(&self) -> impl Iterator<Item = CheckKind> + '_ {
        self.checks.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

impl Default for CheckRegistry {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeMetrics {
        values: HashMap<(String, String), f64>,
        highest: Option<f64>,
        fail_highest: bool,
    }

    impl FakeMetrics {
        fn with(mut self, node: &str, query: &NodeQuery, value: f64) -> Self {
            self.values
                .insert((node.to_string(), query.promql("instance", node)), value);
            self
        }
    }

    #[async_trait]
    impl NodeMetrics for FakeMetrics {
        async fn node_value(&self, node_id: &str, query: &NodeQuery) -> Result<Option<f64>> {
            Ok(self
                .values
                .get(&(node_id.to_string(), query.promql("instance", node_id)))
                .copied())
        }

        async fn highest_head(&self) -> Result<Option<f64>> {
            if self.fail_highest {
                bail!("query timed out");
            }
            Ok(self.highest)
        }
    }

    fn eval(kind: CheckKind, metrics: &FakeMetrics) -> Result<CheckResult> {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(kind.evaluate(metrics, "n1", &Thresholds::default()))
    }

    #[test]
    fn test_low_peers() {
        let healthy = FakeMetrics::default().with("n1", &NodeQuery::FullPeers, 5.0);
        assert!(!eval(CheckKind::LowPeersCount, &healthy).unwrap().fired);

        let low = FakeMetrics::default().with("n1", &NodeQuery::FullPeers, 1.0);
        let result = eval(CheckKind::LowPeersCount, &low).unwrap();
        assert!(result.fired);
        assert_eq!(result.value.to_string(), "1");

        let missing = eval(CheckKind::LowPeersCount, &FakeMetrics::default()).unwrap();
        assert!(missing.fired);
        assert_eq!(missing.value, super::super::CheckValue::Number(0.0));
    }

    #[test]
    fn test_stalled_blocks() {
        let q = NodeQuery::HeadIncrease("10m".to_string());
        let moving = FakeMetrics::default().with("n1", &q, 12.0);
        assert!(!eval(CheckKind::StalledBlocks, &moving).unwrap().fired);

        let stalled = FakeMetrics::default().with("n1", &q, 0.0);
        assert!(eval(CheckKind::StalledBlocks, &stalled).unwrap().fired);
    }

    #[test]
    fn test_out_of_sync() {
        let mut synced = FakeMetrics::default().with("n1", &NodeQuery::HeadHeight, 1000.0);
        synced.highest = Some(1040.0);
        assert!(!eval(CheckKind::OutOfSync, &synced).unwrap().fired);

        let mut behind = FakeMetrics::default().with("n1", &NodeQuery::HeadHeight, 900.0);
        behind.highest = Some(1000.0);
        assert!(eval(CheckKind::OutOfSync, &behind).unwrap().fired);

        let no_network = FakeMetrics::default().with("n1", &NodeQuery::HeadHeight, 900.0);
        assert!(eval(CheckKind::OutOfSync, &no_network).unwrap().fired);
    }

    #[test]
    fn test_evaluation_error_propagates() {
        let mut failing = FakeMetrics::default().with("n1", &NodeQuery::HeadHeight, 900.0);
        failing.fail_highest = true;
        assert!(eval(CheckKind::OutOfSync, &failing).is_err());
    }

    #[test]
    fn test_no_archival_peers() {
        let none = FakeMetrics::default().with("n1", &NodeQuery::ArchivalPeers, 0.0);
        assert!(eval(CheckKind::NoArchivalPeers, &none).unwrap().fired);
        let some = FakeMetrics::default().with("n1", &NodeQuery::ArchivalPeers, 3.0);
        assert!(!eval(CheckKind::NoArchivalPeers, &some).unwrap().fired);
    }

    #[test]
    fn test_render_messages() {
        let messages = CheckKind::OutOfSync
            .render("42", "12D3KooWabc", "bridge", "Mainnet", &Thresholds::default())
            .unwrap();
        assert_eq!(messages.fire.title, "**Warning!** Node Sync Alert");
        assert!(messages.fire.text.contains("<@42>"));
        assert!(messages.fire.text.contains("`Mainnet bridge`"));
        assert!(messages.fire.text.ends_with("is out of sync."));
        assert_eq!(messages.resolve.title, "**Resolved!** Node Sync Alert");
    }

    #[test]
    fn test_render_resolve_wording() {
        let messages = CheckKind::LowPeersCount
            .render("42", "node-a", "light", "Testnet", &Thresholds::default())
            .unwrap();
        assert_eq!(
            messages.resolve.text,
            "**<@42> you can chillin' now! Your `Testnet light` node**\n\n**`node-a`** now has more than 2 connected peers."
        );
    }

    #[test]
    fn test_render_rejects_blank_ids() {
        let t = Thresholds::default();
        assert!(CheckKind::LowPeersCount.render("", "n1", "light", "Testnet", &t).is_err());
        assert!(CheckKind::LowPeersCount.render("u1", " ", "light", "Testnet", &t).is_err());
    }

    #[test]
    fn test_registry_from_names() {
        assert_eq!(CheckRegistry::from_names(&[]).unwrap().len(), 4);

        let names = vec!["OutOfSync".to_string(), "LowPeersCount".to_string()];
        let registry = CheckRegistry::from_names(&names).unwrap();
        let order: Vec<_> = registry.iter().map(|c| c.name()).collect();
        assert_eq!(order, vec!["OutOfSync", "LowPeersCount"]);

        let dup = vec!["OutOfSync".to_string(), "OutOfSync".to_string()];
        assert!(CheckRegistry::from_names(&dup).is_err());
        assert!(CheckRegistry::from_names(&["Bogus".to_string()]).is_err());
    }
}
