//! Prometheus HTTP API client
//!
//! Per-node series are selected by `exported_instance` first (nodes pushing
//! through a gateway) and by `instance` when that yields nothing or fails.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::{NodeDirectory, NodeMetrics, NodeQuery, TtlCache};
use crate::config::{Config, Network};
use crate::logging::preview_ids;

const NODE_LABELS: [&str; 2] = ["exported_instance", "instance"];

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    status: String,
    data: Option<T>,
    #[serde(rename = "errorType")]
    error_type: Option<String>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn into_data(self) -> Result<T> {
        if self.status != "success" {
            bail!(
                "Prometheus error ({}): {}",
                self.error_type.as_deref().unwrap_or("unknown"),
                self.error.as_deref().unwrap_or("no message")
            );
        }
        self.data.context("Prometheus response has no data")
    }
}

#[derive(Debug, Deserialize)]
struct VectorData {
    #[serde(rename = "resultType")]
    result_type: String,
    result: Vec<VectorSample>,
}

/// One element of an instant vector.
#[derive(Debug, Clone, Deserialize)]
pub struct VectorSample {
    #[serde(default)]
    pub metric: HashMap<String, String>,
    /// `[unix_seconds, "value"]`
    pub value: (f64, String),
}

impl VectorSample {
    pub fn number(&self) -> Option<f64> {
        self.value.1.parse::<f64>().ok().filter(|v| !v.is_nan())
    }
}

fn decode_vector(body: &str) -> Result<Vec<VectorSample>> {
    let response: ApiResponse<VectorData> =
        serde_json::from_str(body).context("Failed to decode Prometheus query response")?;
    let data = response.into_data()?;
    if data.result_type != "vector" {
        bail!("Expected an instant vector, got {}", data.result_type);
    }
    Ok(data.result)
}

/// Drop ids that look like IPv4 addresses (scrape targets, not nodes).
fn filter_node_ids(ids: Vec<String>, ip_pattern: &Regex) -> Vec<String> {
    ids.into_iter().filter(|id| !ip_pattern.is_match(id)).collect()
}

/// Fresh cache hit, else fetch; on fetch failure fall back to a stale value.
async fn through_cache<F>(cache: &TtlCache<String, f64>, key: &str, fetch: F) -> Result<Option<f64>>
where
    F: Future<Output = Result<Option<f64>>>,
{
    let cached = cache.get(&key.to_string());
    if let Some((value, true)) = cached {
        debug!("Prometheus: using cached {} = {}", key, value);
        return Ok(Some(value));
    }
    match fetch.await {
        Ok(Some(value)) => {
            cache.insert(key.to_string(), value);
            Ok(Some(value))
        }
        Ok(None) => Ok(None),
        Err(e) => match cached {
            Some((stale, _)) => {
                warn!("Prometheus: refresh of {} failed, using stale value {}: {:#}", key, stale, e);
                Ok(Some(stale))
            }
            None => Err(e),
        },
    }
}

pub struct PrometheusClient {
    base: Url,
    http: reqwest::Client,
    network: Network,
    head_cache: TtlCache<String, f64>,
    ip_pattern: Regex,
}

impl PrometheusClient {
    pub fn new(base_url: &str, network: Network, timeout: Duration, head_cache_ttl: Duration) -> Result<Self> {
        let mut base = Url::parse(base_url).with_context(|| format!("Invalid Prometheus URL {:?}", base_url))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("node-alerts/{}", Config::version()))
            .build()
            .context("Failed to create HTTP client")?;
        let ip_pattern = Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").context("Invalid IP pattern")?;
        Ok(Self {
            base,
            http,
            network,
            head_cache: TtlCache::new(head_cache_ttl),
            ip_pattern,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("Invalid API path {:?}", path))
    }

    async fn get_text(&self, url: Url, params: &[(&str, String)]) -> Result<String> {
        let resp = self
            .http
            .get(url.clone())
            .query(params)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        // Prometheus reports query errors as JSON with 4xx, decode those too.
        if !status.is_success() && !body.trim_start().starts_with('{') {
            bail!("Prometheus {}: {}", status, body.chars().take(300).collect::<String>());
        }
        Ok(body)
    }

    pub async fn instant_query(&self, query: &str) -> Result<Vec<VectorSample>> {
        let url = self.endpoint("api/v1/query")?;
        let body = self.get_text(url, &[("query", query.to_string())]).await?;
        decode_vector(&body).with_context(|| format!("Query {:?}", query))
    }

    pub async fn label_values(&self, label: &str, lookback: ChronoDuration) -> Result<Vec<String>> {
        let url = self.endpoint(&format!("api/v1/label/{}/values", label))?;
        let end = Utc::now();
        let start = end - lookback;
        let params = [
            ("start", start.timestamp().to_string()),
            ("end", end.timestamp().to_string()),
        ];
        let body = self.get_text(url, &params).await?;
        let response: ApiResponse<Vec<String>> =
            serde_json::from_str(&body).context("Failed to decode label values response")?;
        response.into_data()
    }

    /// Run a per-node query with the label fallback.
    async fn query_node<F>(&self, node_id: &str, render: F) -> Result<Vec<VectorSample>>
    where
        F: Fn(&str) -> String,
    {
        let [primary, fallback] = NODE_LABELS;
        match self.instant_query(&render(primary)).await {
            Ok(samples) if !samples.is_empty() => return Ok(samples),
            Ok(_) => debug!("Prometheus: no {} series for {}, trying {}", primary, node_id, fallback),
            Err(e) => debug!("Prometheus: {} query for {} failed ({:#}), trying {}", primary, node_id, e, fallback),
        }
        self.instant_query(&render(fallback)).await
    }
}

#[async_trait]
impl NodeMetrics for PrometheusClient {
    async fn node_value(&self, node_id: &str, query: &NodeQuery) -> Result<Option<f64>> {
        let samples = self
            .query_node(node_id, |label| query.promql(label, node_id))
            .await?;
        Ok(samples.first().and_then(VectorSample::number))
    }

    async fn highest_head(&self) -> Result<Option<f64>> {
        let pattern = self.network.job_pattern();
        let query = format!(
            "max(hdr_sync_subjective_head_gauge{{exported_job=~\"{}\"}})",
            pattern
        );
        through_cache(&self.head_cache, &pattern, async {
            let samples = self.instant_query(&query).await?;
            Ok(samples.first().and_then(VectorSample::number))
        })
        .await
    }
}

#[async_trait]
impl NodeDirectory for PrometheusClient {
    async fn list_known_node_ids(&self) -> Result<Vec<String>> {
        let lookback = ChronoDuration::days(1);
        let [primary, fallback] = NODE_LABELS;
        let ids = match self.label_values(primary, lookback).await {
            Ok(ids) => ids,
            Err(e) => {
                debug!("Prometheus: {} label values failed ({:#}), trying {}", primary, e, fallback);
                self.label_values(fallback, lookback)
                    .await
                    .with_context(|| format!("Both {} and {} label lookups failed", primary, fallback))?
            }
        };
        let total = ids.len();
        let nodes = filter_node_ids(ids, &self.ip_pattern);
        info!(
            "Prometheus: {} nodes ({} IP targets dropped) {}",
            nodes.len(),
            total - nodes.len(),
            preview_ids(&nodes, 3)
        );
        Ok(nodes)
    }

    /// Node type from the `build_info` job label, e.g. `bridge` for `celestia/bridge`.
    async fn node_type(&self, node_id: &str) -> Result<Option<String>> {
        let samples = self
            .query_node(node_id, |label| format!("build_info{{{}=\"{}\"}}", label, node_id))
            .await?;
        Ok(samples.iter().find_map(|s| {
            let job = s.metric.get("exported_job").or_else(|| s.metric.get("job"))?;
            self.network.parse_node_type(job)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use tokio::time;

    #[test]
    fn test_decode_vector() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[
            {"metric":{"exported_job":"celestia/bridge"},"value":[1700000000.5,"17"]}
        ]}}"#;
        let samples = decode_vector(body).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].number(), Some(17.0));
        assert_eq!(samples[0].metric["exported_job"], "celestia/bridge");
    }

    #[test]
    fn test_decode_error_response() {
        let body = r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#;
        let err = decode_vector(body).unwrap_err();
        assert!(format!("{:#}", err).contains("parse error"));
    }

    #[test]
    fn test_nan_is_not_a_value() {
        let sample = VectorSample {
            metric: HashMap::new(),
            value: (0.0, "NaN".to_string()),
        };
        assert_eq!(sample.number(), None);
    }

    #[test]
    fn test_filter_node_ids_drops_ips() {
        let pattern = Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap();
        let ids = vec![
            "12D3KooWabc".to_string(),
            "10.0.0.12:26660".to_string(),
            "bridge-1".to_string(),
        ];
        assert_eq!(filter_node_ids(ids, &pattern), vec!["12D3KooWabc", "bridge-1"]);
    }

    #[test]
    fn test_base_url_keeps_path_prefix() {
        let client = PrometheusClient::new(
            "http://prom.example:9090/prometheus",
            Network::Mainnet,
            Duration::from_secs(5),
            Duration::from_secs(60),
        )
        .unwrap();
        assert_eq!(
            client.endpoint("api/v1/query").unwrap().as_str(),
            "http://prom.example:9090/prometheus/api/v1/query"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_through_cache_fresh_hit_skips_fetch() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("k".to_string(), 100.0);
        let value = through_cache(&cache, "k", async { Err(anyhow!("must not be called")) })
            .await
            .unwrap();
        assert_eq!(value, Some(100.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_through_cache_stale_fallback() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("k".to_string(), 100.0);
        time::advance(Duration::from_secs(61)).await;

        let value = through_cache(&cache, "k", async { Err(anyhow!("timeout")) })
            .await
            .unwrap();
        assert_eq!(value, Some(100.0));

        let value = through_cache(&cache, "k", async { Ok(Some(250.0)) }).await.unwrap();
        assert_eq!(value, Some(250.0));
        assert_eq!(cache.get(&"k".to_string()), Some((250.0, true)));
    }

    #[tokio::test]
    async fn test_through_cache_error_without_value() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let result = through_cache(&cache, "k", async { Err(anyhow!("timeout")) }).await;
        assert!(result.is_err());
    }
}
