//! Metrics recorder: timestamped samples per (metric, app).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use rlscale_core::config::MetricsConfig;
use rlscale_core::{AppName, ConfigError, Metric, MetricsSource};
use tokio::sync::{RwLock, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace};

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    value: f64,
}

/// Samples of one metric, keyed by app (`None` for unlabelled samples).
type Series = HashMap<Option<AppName>, Vec<Sample>>;

/// In-memory sample store answering windowed-average queries.
pub struct MetricsRecorder {
    /// metric name → app → samples, oldest first.
    series: Arc<RwLock<HashMap<String, Series>>>,
    app_include: Option<Regex>,
    app_exclude: Option<Regex>,
    /// Samples older than this are dropped by [`prune`](Self::prune).
    retention: Duration,
    /// Window used for [`single_value`](MetricsSource::single_value).
    query_window: Duration,
}

impl MetricsRecorder {
    pub fn new(retention: Duration, query_window: Duration) -> Self {
        Self {
            series: Arc::new(RwLock::new(HashMap::new())),
            app_include: None,
            app_exclude: None,
            retention,
            query_window,
        }
    }

    /// Build a recorder with the app filters from `[metrics]`; single-value
    /// queries average over one scrape interval.
    pub fn from_config(config: &MetricsConfig, retention: Duration) -> Result<Self, ConfigError> {
        let compile = |field: &'static str, pattern: &Option<String>| {
            pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|source| ConfigError::Regex { field, source })
        };
        let mut recorder = Self::new(
            retention,
            Duration::from_secs(config.scrape_interval_secs),
        );
        recorder.app_include = compile("metrics.app_include_regex", &config.app_include_regex)?;
        recorder.app_exclude = compile("metrics.app_exclude_regex", &config.app_exclude_regex)?;
        Ok(recorder)
    }

    /// Record one sample taken now.
    pub async fn record(&self, name: &str, app: Option<&str>, value: f64) {
        let mut series = self.series.write().await;
        series
            .entry(name.to_string())
            .or_default()
            .entry(app.map(str::to_string))
            .or_default()
            .push(Sample {
                at: Instant::now(),
                value,
            });
        trace!(metric = %name, app = app.unwrap_or("-"), value, "sample recorded");
    }

    pub async fn record_metric(&self, metric: &Metric) {
        self.record(&metric.name, metric.app(), metric.value).await;
    }

    /// Drop samples older than the retention horizon; returns how many.
    pub async fn prune(&self) -> usize {
        let Some(cutoff) = Instant::now().checked_sub(self.retention) else {
            return 0;
        };
        let mut series = self.series.write().await;
        let mut removed = 0;
        for by_app in series.values_mut() {
            for samples in by_app.values_mut() {
                let before = samples.len();
                samples.retain(|s| s.at >= cutoff);
                removed += before - samples.len();
            }
            by_app.retain(|_, samples| !samples.is_empty());
        }
        series.retain(|_, by_app| !by_app.is_empty());
        if removed > 0 {
            debug!(removed, "pruned expired samples");
        }
        removed
    }

    /// Number of samples currently held.
    pub async fn sample_count(&self) -> usize {
        let series = self.series.read().await;
        series
            .values()
            .flat_map(|by_app| by_app.values())
            .map(Vec::len)
            .sum()
    }

    /// Prune periodically until shutdown.
    pub async fn run_pruner(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "sample pruner started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.prune().await;
                }
                _ = shutdown.changed() => {
                    info!("sample pruner shutting down");
                    break;
                }
            }
        }
    }

    fn app_allowed(&self, app: &str) -> bool {
        let included = self.app_include.as_ref().is_none_or(|re| re.is_match(app));
        let excluded = self.app_exclude.as_ref().is_some_and(|re| re.is_match(app));
        included && !excluded
    }
}

fn mean_since(samples: &[Sample], since: Option<Instant>) -> Option<f64> {
    let (sum, count) = samples
        .iter()
        .filter(|s| since.is_none_or(|t| s.at >= t))
        .fold((0.0, 0usize), |(sum, n), s| (sum + s.value, n + 1));
    (count > 0).then(|| sum / count as f64)
}

#[async_trait]
impl MetricsSource for MetricsRecorder {
    async fn list_metric_names(&self) -> Vec<String> {
        let series = self.series.read().await;
        series.keys().cloned().collect::<BTreeSet<_>>().into_iter().collect()
    }

    async fn averaged_values(&self, metric_name: &str, window: Duration) -> Vec<Metric> {
        let since = Instant::now().checked_sub(window);
        let series = self.series.read().await;
        let Some(by_app) = series.get(metric_name) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for (app, samples) in by_app {
            let Some(app) = app else {
                trace!(metric = %metric_name, "skipping samples without app");
                continue;
            };
            if !self.app_allowed(app) {
                trace!(metric = %metric_name, %app, "app filtered out");
                continue;
            }
            if let Some(mean) = mean_since(samples, since) {
                out.push(Metric::new(metric_name, mean, app.clone()));
            }
        }
        out.sort_by(|a, b| a.app.cmp(&b.app));
        out
    }

    async fn single_value(&self, query: &str) -> Option<Metric> {
        let since = Instant::now().checked_sub(self.query_window);
        let series = self.series.read().await;
        let all: Vec<Sample> = series
            .get(query)?
            .values()
            .flatten()
            .copied()
            .collect();
        mean_since(&all, since).map(|v| Metric::unscoped(query, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> MetricsRecorder {
        MetricsRecorder::new(Duration::from_secs(600), Duration::from_secs(15))
    }

    async fn advance(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn averages_per_app_within_window() {
        let r = recorder();
        r.record("latency", Some("web"), 500.0).await;
        advance(100).await;
        r.record("latency", Some("web"), 100.0).await;
        r.record("latency", Some("web"), 200.0).await;
        r.record("latency", Some("api"), 40.0).await;
        r.record("latency", None, 9_999.0).await;

        let values = r.averaged_values("latency", Duration::from_secs(60)).await;
        assert_eq!(
            values,
            vec![
                Metric::new("latency", 40.0, "api"),
                Metric::new("latency", 150.0, "web"),
            ]
        );
        assert!(r.averaged_values("cpu", Duration::from_secs(60)).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn app_filters_apply() {
        let config = MetricsConfig {
            app_include_regex: Some("^(web|api)".to_string()),
            app_exclude_regex: Some("canary".to_string()),
            ..Default::default()
        };
        let r = MetricsRecorder::from_config(&config, Duration::from_secs(600)).unwrap();
        r.record("cpu", Some("web"), 1.0).await;
        r.record("cpu", Some("web-canary"), 1.0).await;
        r.record("cpu", Some("batch"), 1.0).await;

        let apps: Vec<Option<AppName>> = r
            .averaged_values("cpu", Duration::from_secs(60))
            .await
            .into_iter()
            .map(|m| m.app)
            .collect();
        assert_eq!(apps, vec![Some("web".to_string())]);
    }

    #[tokio::test]
    async fn bad_filter_is_a_config_error() {
        let config = MetricsConfig {
            app_exclude_regex: Some("(".to_string()),
            ..Default::default()
        };
        let err = MetricsRecorder::from_config(&config, Duration::from_secs(1)).err();
        assert!(matches!(
            err,
            Some(ConfigError::Regex { field: "metrics.app_exclude_regex", .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn single_value_ignores_app_and_old_samples() {
        let r = recorder();
        r.record("p95", Some("web"), 1_000.0).await;
        advance(30).await;
        r.record("p95", Some("web"), 10.0).await;
        r.record("p95", None, 30.0).await;

        assert_eq!(r.single_value("p95").await, Some(Metric::unscoped("p95", 20.0)));
        assert_eq!(r.single_value("missing").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn prune_drops_expired_samples() {
        let r = recorder();
        r.record("cpu", Some("web"), 1.0).await;
        advance(601).await;
        r.record("mem", Some("web"), 2.0).await;

        assert_eq!(r.prune().await, 1);
        assert_eq!(r.sample_count().await, 1);
        assert_eq!(r.list_metric_names().await, vec!["mem".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn names_are_sorted_and_distinct() {
        let r = recorder();
        r.record("b", Some("web"), 1.0).await;
        r.record("a", Some("web"), 1.0).await;
        r.record("b", Some("api"), 1.0).await;
        assert_eq!(r.list_metric_names().await, vec!["a".to_string(), "b".to_string()]);
    }
}
