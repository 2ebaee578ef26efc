//! Contracts of the external collaborators the decision engine talks to.
//!
//! The engine never retries and never treats an empty answer as an error:
//! a metrics source that cannot reach its backend returns empty results,
//! and a failed scale command is reported through [`ScalingResponse`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::types::{AppName, Metric, ScalingRequest, ScalingResponse};

/// Source of aggregated measurements.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Names of all metrics currently known to the backend.
    async fn list_metric_names(&self) -> Vec<String>;

    /// One averaged value per app for `metric_name` over the last `window`.
    async fn averaged_values(&self, metric_name: &str, window: Duration) -> Vec<Metric>;

    /// Evaluate a free-form query to a single value, if the backend has one.
    async fn single_value(&self, query: &str) -> Option<Metric>;
}

/// The platform that actually runs the managed apps.
#[async_trait]
pub trait PlatformConnector: Send + Sync {
    /// Desired instance count per app, keyed by platform app name.
    async fn current_instances(&self) -> anyhow::Result<HashMap<AppName, u32>>;

    /// Set an app to the requested number of instances.
    async fn scale(&self, request: &ScalingRequest) -> ScalingResponse;
}

/// Sink for measurements and executed actions, consumed by offline training.
///
/// Calls are fire-and-forget from the engine's point of view: errors are
/// logged and never abort the loop.
pub trait TrainingDataSink: Send + Sync {
    /// Record the executed delta per app next to the measurements that led to it.
    fn commit_actions(
        &self,
        time_ms: u64,
        measurements: &[Metric],
        actions: &HashMap<AppName, i64>,
    ) -> anyhow::Result<()>;

    /// Record measurements without an associated action.
    fn commit_measurements(&self, time_ms: u64, measurements: &[Metric]) -> anyhow::Result<()>;
}
