//! node-alerts Library
//!
//! Watches nodes through Prometheus and sends Discord DMs to subscribed users
//! when a node health check starts or stops failing.
//!
//! ## Architecture
//!
//! The codebase is organized into modules:
//! - `alerts`: Checks, hysteresis, reconciliation, notification channels
//! - `monitors`: Concurrent check evaluation across nodes
//! - `cycle`: One end-to-end reconciliation cycle
//! - `scheduler`: Cron loop driving cycles
//! - `metrics`: Prometheus client and the metrics traits the checks use
//! - `store`: Subscription persistence (JSON file)
//! - `config`: Paths, settings file, environment overrides
//! - `discord`: Bot token resolution
//! - `commands`: Subscription management for the CLI
//! - `logging`: Structured logging with tracing
//!
//! ## Main Entry Points
//!
//! - [`App::runner`]: Build a [`cycle::CycleRunner`] wired to the real collaborators
//! - [`scheduler::Scheduler::run`]: Run cycles until cancelled

pub mod alerts;
pub mod commands;
pub mod config;
pub mod cycle;
pub mod discord;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod monitors;
pub mod scheduler;
pub mod store;

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use alerts::channels::Notifier;
use alerts::engine::ReconcilePolicy;
use alerts::CheckRegistry;
use config::{Config, Settings};
use cycle::{Concurrency, CycleRunner};
use metrics::PrometheusClient;
use store::JsonFileStore;

pub use logging::init_tracing;

/// Long-lived collaborators built from [`Settings`].
pub struct App {
    pub settings: Settings,
    pub prometheus: Arc<PrometheusClient>,
    pub store: Arc<JsonFileStore>,
}

impl App {
    pub fn new(settings: Settings) -> Result<Self> {
        let prometheus = PrometheusClient::new(
            &settings.prometheus_url,
            settings.network(),
            settings.http_timeout(),
            settings.head_cache_ttl(),
        )?;
        let store = JsonFileStore::new(Config::subscriptions_file_path());
        info!(
            "App: network {} via {}, subscriptions in {:?}",
            settings.network().label(),
            settings.prometheus_url,
            store.path()
        );
        Ok(Self {
            settings,
            prometheus: Arc::new(prometheus),
            store: Arc::new(store),
        })
    }

    pub fn runner(&self, notifier: Arc<dyn Notifier>, cancel: CancellationToken) -> Result<CycleRunner> {
        let registry = CheckRegistry::from_names(&self.settings.checks)?;
        let policy = ReconcilePolicy {
            activation_threshold: self.settings.activation_threshold,
            network_label: self.settings.network().label().to_string(),
            thresholds: self.settings.thresholds(),
        };
        let concurrency = Concurrency {
            evaluation: self.settings.evaluation_concurrency,
            reconcile: self.settings.reconcile_concurrency,
        };
        Ok(CycleRunner::new(
            registry,
            self.prometheus.clone(),
            self.prometheus.clone(),
            self.store.clone(),
            notifier,
            policy,
            concurrency,
            cancel,
        ))
    }
}
