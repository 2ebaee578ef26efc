//! Decision engine: the control loop.
//!
//! Each iteration optionally exports raw measurements for training, and once
//! the scaling interval has elapsed it imports aggregated measurements, runs
//! the three policy dispatchers, pushes their proposals through the
//! [`ConstraintPipeline`] and executes the resulting commands. The loop then
//! sleeps for the shorter of the scaling and scrape intervals.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use regex::Regex;
use rlscale_core::{
    AppName, AutoscalerConfig, ConfigError, Metric, MetricsSource, PlatformConnector,
    ScalingRequest, TrainingDataSink,
};
use rlscale_policy::{
    ImprovedReward, ModelProvider, PolicyDispatcher, PolicyFailure, PolicyKind, ProactivePolicy,
    ReactivePolicy, RewardFunction, SafetyPolicy,
};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::instances::InstanceState;
use crate::pipeline::{ConstraintPipeline, Proposals};
use crate::settings::LiveSettings;

/// Called with the report of every scaling round.
pub type ReportCallback = Arc<dyn Fn(&IterationReport) + Send + Sync>;

/// What happened in one scaling round.
#[derive(Debug, Default)]
pub struct IterationReport {
    /// Number of measurements imported for the round.
    pub measurements: usize,
    pub proposals: Proposals,
    /// Commands that survived the constraint pipeline.
    pub commands: Vec<ScalingRequest>,
    /// Executed delta per app; 0 for failed commands and unscaled apps.
    pub actions: HashMap<AppName, i64>,
    pub failures: Vec<PolicyFailure>,
    /// Instance counts after execution.
    pub instances: HashMap<AppName, u32>,
}

/// Collaborators and shared handles of an engine, without any loop state.
///
/// Building an engine from the same parts again yields one with fresh
/// policies and rate limits that still reads and writes the same instance
/// map and live settings.
#[derive(Clone)]
pub struct EngineParts {
    config: Arc<AutoscalerConfig>,
    metrics: Arc<dyn MetricsSource>,
    platform: Arc<dyn PlatformConnector>,
    models: Arc<dyn ModelProvider>,
    reward: Arc<dyn RewardFunction>,
    training: Option<Arc<dyn TrainingDataSink>>,
    include: Option<Regex>,
    instances: InstanceState,
    settings: LiveSettings,
    on_report: Option<ReportCallback>,
}

impl EngineParts {
    pub fn instance_state(&self) -> InstanceState {
        self.instances.clone()
    }

    pub fn settings(&self) -> LiveSettings {
        self.settings.clone()
    }
}

pub struct DecisionEngine {
    config: Arc<AutoscalerConfig>,
    metrics: Arc<dyn MetricsSource>,
    platform: Arc<dyn PlatformConnector>,
    training: Option<Arc<dyn TrainingDataSink>>,
    models: Arc<dyn ModelProvider>,
    reward: Arc<dyn RewardFunction>,
    include: Option<Regex>,
    instances: InstanceState,
    settings: LiveSettings,
    proactive: PolicyDispatcher<ProactivePolicy>,
    reactive: PolicyDispatcher<ReactivePolicy>,
    safety: PolicyDispatcher<SafetyPolicy>,
    pipeline: ConstraintPipeline,
    last_actions: HashMap<AppName, i64>,
    next_scaling_at: Option<Instant>,
    on_report: Option<ReportCallback>,
}

impl DecisionEngine {
    /// Create an engine with the default reward function, a fresh instance
    /// state and live settings copied from `config`.
    pub fn new(
        config: Arc<AutoscalerConfig>,
        metrics: Arc<dyn MetricsSource>,
        platform: Arc<dyn PlatformConnector>,
        models: Arc<dyn ModelProvider>,
    ) -> Result<Self, ConfigError> {
        let include = config
            .metrics
            .include_regex
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|source| ConfigError::Regex {
                field: "metrics.include_regex",
                source,
            })?;

        Ok(Self::from_parts(EngineParts {
            settings: LiveSettings::from_config(&config),
            instances: InstanceState::new(),
            reward: Arc::new(ImprovedReward::default()),
            training: None,
            on_report: None,
            include,
            models,
            metrics,
            platform,
            config,
        }))
    }

    /// Build an engine with empty loop state around existing parts.
    pub fn from_parts(parts: EngineParts) -> Self {
        let kpis = parts.config.scaling.kpis.clone();
        let safety_config = parts.config.scaling.safety;

        Self {
            proactive: proactive_dispatcher(&parts.config, parts.models.clone(), parts.reward.clone()),
            reactive: PolicyDispatcher::new(
                PolicyKind::Reactive,
                kpis.clone(),
                Box::new(ReactivePolicy::new),
            ),
            safety: PolicyDispatcher::new(
                PolicyKind::Safety,
                kpis,
                Box::new(move |app: &str| SafetyPolicy::new(app, &safety_config)),
            ),
            pipeline: ConstraintPipeline::new(),
            last_actions: HashMap::new(),
            next_scaling_at: None,
            settings: parts.settings,
            instances: parts.instances,
            training: parts.training,
            on_report: parts.on_report,
            include: parts.include,
            reward: parts.reward,
            models: parts.models,
            metrics: parts.metrics,
            platform: parts.platform,
            config: parts.config,
        }
    }

    pub fn parts(&self) -> EngineParts {
        EngineParts {
            config: self.config.clone(),
            metrics: self.metrics.clone(),
            platform: self.platform.clone(),
            models: self.models.clone(),
            reward: self.reward.clone(),
            training: self.training.clone(),
            include: self.include.clone(),
            instances: self.instances.clone(),
            settings: self.settings.clone(),
            on_report: self.on_report.clone(),
        }
    }

    /// Replace the reward appended to the proactive model state.
    pub fn with_reward(mut self, reward: Arc<dyn RewardFunction>) -> Self {
        self.proactive = proactive_dispatcher(&self.config, self.models.clone(), reward.clone());
        self.reward = reward;
        self
    }

    /// Store measurements and actions for offline training.
    pub fn with_training_sink(mut self, sink: Arc<dyn TrainingDataSink>) -> Self {
        self.training = Some(sink);
        self
    }

    /// Share an existing instance map instead of a private one.
    pub fn with_instance_state(mut self, instances: InstanceState) -> Self {
        self.instances = instances;
        self
    }

    pub fn with_settings(mut self, settings: LiveSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_report_fn(
        mut self,
        f: impl Fn(&IterationReport) + Send + Sync + 'static,
    ) -> Self {
        self.on_report = Some(Arc::new(f));
        self
    }

    pub fn instance_state(&self) -> InstanceState {
        self.instances.clone()
    }

    pub fn settings(&self) -> LiveSettings {
        self.settings.clone()
    }

    pub fn last_actions(&self) -> &HashMap<AppName, i64> {
        &self.last_actions
    }

    pub fn pipeline(&self) -> &ConstraintPipeline {
        &self.pipeline
    }

    /// Seed the instance map from the platform, translating platform app
    /// names to metrics names. On failure the previous map is kept.
    pub async fn init_instances(&self) {
        match self.platform.current_instances().await {
            Ok(counts) => {
                let counts: HashMap<AppName, u32> = counts
                    .into_iter()
                    .map(|(name, n)| (self.config.metrics_name_for(&name), n))
                    .collect();
                info!(apps = counts.len(), "instance state loaded from platform");
                self.instances.replace_all(counts);
            }
            Err(e) => {
                error!(error = %e, "failed to read instance counts, keeping previous state");
            }
        }
    }

    /// Import measurements averaged over `window`.
    ///
    /// KPIs that are not exposed under their own name are fetched through
    /// their query and relabelled to the KPI name and owning app.
    pub async fn import_measurements(&self, window: Duration) -> Vec<Metric> {
        let names = self.metrics.list_metric_names().await;
        let mut measurements = Vec::new();

        for name in &names {
            if let Some(re) = &self.include
                && !re.is_match(name)
            {
                continue;
            }
            measurements.extend(self.metrics.averaged_values(name, window).await);
        }

        for (app, kpis) in &self.config.scaling.kpis {
            for kpi in kpis {
                if names.iter().any(|n| *n == kpi.name) {
                    continue;
                }
                match self.metrics.single_value(kpi.query()).await {
                    Some(metric) => measurements.push(metric.relabel(&kpi.name, app)),
                    None => debug!(%app, kpi = %kpi.name, query = kpi.query(), "KPI query returned nothing"),
                }
            }
        }

        debug!(count = measurements.len(), window_secs = window.as_secs(), "measurements imported");
        measurements
    }

    /// One loop iteration. Returns the report if a scaling round ran.
    pub async fn iterate(&mut self) -> Option<IterationReport> {
        let now = Instant::now();

        if self.config.training.export_enabled
            && let Some(sink) = &self.training
        {
            let measurements = self.import_measurements(self.config.scrape_interval()).await;
            if let Err(e) = sink.commit_measurements(epoch_ms(), &measurements) {
                error!(error = %e, "failed to export measurements");
            }
        }

        if let Some(at) = self.next_scaling_at
            && now < at
        {
            return None;
        }

        let report = self.scaling_round(now).await;
        self.next_scaling_at = Some(now + self.config.scaling_interval());
        if let Some(cb) = &self.on_report {
            cb(&report);
        }
        Some(report)
    }

    /// Import, dispatch, constrain and execute.
    pub async fn scaling_round(&mut self, now: Instant) -> IterationReport {
        let measurements = self
            .import_measurements(self.config.scaling_interval())
            .await;
        let instances = self.instances.snapshot();

        let safety = self.safety.dispatch(&measurements, &instances, &self.last_actions);
        let reactive = self.reactive.dispatch(&measurements, &instances, &self.last_actions);
        let proactive = self.proactive.dispatch(&measurements, &instances, &self.last_actions);

        let mut failures = safety.failures;
        failures.extend(reactive.failures);
        failures.extend(proactive.failures);
        for failure in &failures {
            error!(
                app = %failure.app,
                policy = %failure.kind,
                error = %failure.error,
                "policy instance failed this interval"
            );
        }

        let proposals = Proposals {
            proactive: proactive.proposals,
            reactive: reactive.proposals,
            safety: safety.proposals,
        };
        let settings = self.settings.snapshot();
        let commands = self
            .pipeline
            .decide(&proposals, &instances, &settings, now);

        let mut actions: HashMap<AppName, i64> = HashMap::new();
        for command in &commands {
            let delta = self.execute(command).await;
            actions.insert(command.app.clone(), delta);
        }
        for m in &measurements {
            if let Some(app) = m.app() {
                actions.entry(app.to_string()).or_insert(0);
            }
        }

        if self.config.training.export_enabled
            && let Some(sink) = &self.training
            && let Err(e) = sink.commit_actions(epoch_ms(), &measurements, &actions)
        {
            error!(error = %e, "failed to export actions");
        }

        info!(
            measurements = measurements.len(),
            commands = commands.len(),
            failures = failures.len(),
            "scaling round complete"
        );

        self.last_actions = actions.clone();
        IterationReport {
            measurements: measurements.len(),
            proposals,
            commands,
            actions,
            failures,
            instances: self.instances.snapshot(),
        }
    }

    /// Send one command to the platform and return the executed delta.
    async fn execute(&self, command: &ScalingRequest) -> i64 {
        let request = ScalingRequest::new(
            self.config.platform_name_for(&command.app),
            command.instances,
        );
        let response = self.platform.scale(&request).await;
        if !response.success {
            error!(
                app = %command.app,
                instances = command.instances,
                message = response.message.as_deref().unwrap_or(""),
                "scaling command failed"
            );
            return 0;
        }

        let Ok(count) = u32::try_from(command.instances) else {
            warn!(
                app = %command.app,
                instances = command.instances,
                "executed count does not fit an instance count, state not updated"
            );
            return 0;
        };
        let delta = self.instances.set_count(&command.app, count);
        info!(app = %command.app, instances = count, delta, "scaled");
        delta
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    ///
    /// An iteration in flight always completes; only the sleep between
    /// iterations is cut short.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        self.init_instances().await;

        let pause = self.config.loop_interval();
        info!(
            interval_secs = self.config.scaling.interval_secs,
            pause_secs = pause.as_secs(),
            "decision engine started"
        );

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            self.iterate().await;

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }

        info!("decision engine stopped");
    }
}

fn proactive_dispatcher(
    config: &AutoscalerConfig,
    models: Arc<dyn ModelProvider>,
    reward: Arc<dyn RewardFunction>,
) -> PolicyDispatcher<ProactivePolicy> {
    PolicyDispatcher::new(
        PolicyKind::Proactive,
        config.scaling.kpis.clone(),
        Box::new(move |app: &str| ProactivePolicy::new(app, models.clone(), reward.clone())),
    )
}

/// Milliseconds since the Unix epoch.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rlscale_core::{KpiDefinition, ScalingResponse};
    use rlscale_policy::ModelRegistry;
    use std::sync::Mutex;

    struct StaticMetrics {
        metrics: Vec<Metric>,
        queries: HashMap<String, f64>,
    }

    #[async_trait]
    impl MetricsSource for StaticMetrics {
        async fn list_metric_names(&self) -> Vec<String> {
            let mut names: Vec<String> = self.metrics.iter().map(|m| m.name.clone()).collect();
            names.sort();
            names.dedup();
            names
        }

        async fn averaged_values(&self, metric_name: &str, _window: Duration) -> Vec<Metric> {
            self.metrics
                .iter()
                .filter(|m| m.name == metric_name)
                .cloned()
                .collect()
        }

        async fn single_value(&self, query: &str) -> Option<Metric> {
            self.queries.get(query).map(|v| Metric::unscoped(query, *v))
        }
    }

    #[derive(Default)]
    struct RecordingPlatform {
        counts: HashMap<AppName, u32>,
        fail: bool,
        scaled: Mutex<Vec<ScalingRequest>>,
    }

    #[async_trait]
    impl PlatformConnector for RecordingPlatform {
        async fn current_instances(&self) -> anyhow::Result<HashMap<AppName, u32>> {
            Ok(self.counts.clone())
        }

        async fn scale(&self, request: &ScalingRequest) -> ScalingResponse {
            self.scaled.lock().unwrap().push(request.clone());
            if self.fail {
                ScalingResponse::failed("quota exceeded")
            } else {
                ScalingResponse::ok()
            }
        }
    }

    fn config(toml_extra: &str) -> Arc<AutoscalerConfig> {
        let text = format!(
            r#"
[scaling]
interval_secs = 60
upscale = {{ timeout_secs = 0, limit = 10 }}
downscale = {{ timeout_secs = 0, limit = 10 }}

[scaling.kpis]
web = [ {{ name = "latency", slo = 100.0, query = "web_latency_p95" }} ]
{toml_extra}
"#
        );
        Arc::new(AutoscalerConfig::from_toml_str(&text).unwrap())
    }

    fn engine(
        config: Arc<AutoscalerConfig>,
        metrics: StaticMetrics,
        platform: Arc<RecordingPlatform>,
    ) -> DecisionEngine {
        DecisionEngine::new(
            config,
            Arc::new(metrics),
            platform,
            Arc::new(ModelRegistry::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn kpi_query_fallback_is_relabelled() {
        let metrics = StaticMetrics {
            metrics: vec![Metric::new("cpu", 0.5, "web")],
            queries: HashMap::from([("web_latency_p95".to_string(), 80.0)]),
        };
        let e = engine(config(""), metrics, Arc::new(RecordingPlatform::default()));
        let imported = e.import_measurements(Duration::from_secs(60)).await;
        assert!(imported.contains(&Metric::new("latency", 80.0, "web")));
        assert!(imported.contains(&Metric::new("cpu", 0.5, "web")));
    }

    #[tokio::test]
    async fn include_regex_filters_names() {
        let metrics = StaticMetrics {
            metrics: vec![
                Metric::new("latency", 50.0, "web"),
                Metric::new("cpu", 0.5, "web"),
            ],
            queries: HashMap::new(),
        };
        let cfg = config("[metrics]\ninclude_regex = \"^lat\"\n");
        let e = engine(cfg, metrics, Arc::new(RecordingPlatform::default()));
        let imported = e.import_measurements(Duration::from_secs(60)).await;
        assert_eq!(imported, vec![Metric::new("latency", 50.0, "web")]);
    }

    #[tokio::test]
    async fn reactive_upscale_is_executed_and_recorded() {
        let metrics = StaticMetrics {
            metrics: vec![Metric::new("latency", 300.0, "web")],
            queries: HashMap::new(),
        };
        let platform = Arc::new(RecordingPlatform {
            counts: HashMap::from([("web".to_string(), 2)]),
            ..Default::default()
        });
        let mut e = engine(config(""), metrics, platform.clone());
        e.init_instances().await;

        let report = e.iterate().await.unwrap();
        assert_eq!(report.commands, vec![ScalingRequest::new("web", 6)]);
        assert_eq!(report.actions.get("web"), Some(&4));
        assert_eq!(e.instance_state().count_of("web"), Some(6));
        assert_eq!(*platform.scaled.lock().unwrap(), vec![ScalingRequest::new("web", 6)]);

        // The scaling interval has not elapsed yet.
        assert!(e.iterate().await.is_none());
    }

    #[tokio::test]
    async fn failed_command_records_zero_delta() {
        let metrics = StaticMetrics {
            metrics: vec![Metric::new("latency", 300.0, "web")],
            queries: HashMap::new(),
        };
        let platform = Arc::new(RecordingPlatform {
            counts: HashMap::from([("web".to_string(), 2)]),
            fail: true,
            ..Default::default()
        });
        let mut e = engine(config(""), metrics, platform);
        e.init_instances().await;

        let report = e.iterate().await.unwrap();
        assert_eq!(report.actions.get("web"), Some(&0));
        assert_eq!(e.instance_state().count_of("web"), Some(2));
        assert_eq!(e.last_actions().get("web"), Some(&0));
    }

    #[tokio::test]
    async fn aliases_translate_between_metrics_and_platform() {
        let metrics = StaticMetrics {
            metrics: vec![Metric::new("latency", 300.0, "web")],
            queries: HashMap::new(),
        };
        let platform = Arc::new(RecordingPlatform {
            counts: HashMap::from([("web-prod".to_string(), 1)]),
            ..Default::default()
        });
        let cfg = config("[metrics.app_aliases]\nweb = \"web-prod\"\n");
        let mut e = engine(cfg, metrics, platform.clone());
        e.init_instances().await;
        assert_eq!(e.instance_state().count_of("web"), Some(1));

        e.iterate().await.unwrap();
        assert_eq!(*platform.scaled.lock().unwrap(), vec![ScalingRequest::new("web-prod", 3)]);
    }

    #[tokio::test]
    async fn healthy_app_is_left_alone() {
        let metrics = StaticMetrics {
            metrics: vec![Metric::new("latency", 20.0, "web")],
            queries: HashMap::new(),
        };
        let platform = Arc::new(RecordingPlatform {
            counts: HashMap::from([("web".to_string(), 3)]),
            ..Default::default()
        });
        let mut e = engine(config(""), metrics, platform.clone());
        e.init_instances().await;
        let report = e.iterate().await.unwrap();
        assert!(report.commands.is_empty());
        assert_eq!(report.actions.get("web"), Some(&0));
        assert!(platform.scaled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn out_of_range_count_leaves_state_alone() {
        let metrics = StaticMetrics {
            metrics: Vec::new(),
            queries: HashMap::new(),
        };
        let platform = Arc::new(RecordingPlatform {
            counts: HashMap::from([("web".to_string(), 2)]),
            ..Default::default()
        });
        let e = engine(config(""), metrics, platform);
        e.init_instances().await;

        let huge = ScalingRequest::new("web", i64::from(u32::MAX) + 1);
        assert_eq!(e.execute(&huge).await, 0);
        assert_eq!(e.instance_state().count_of("web"), Some(2));
    }

    #[tokio::test]
    async fn rebuilt_engine_shares_handles_but_not_loop_state() {
        let metrics = StaticMetrics {
            metrics: vec![Metric::new("latency", 300.0, "web")],
            queries: HashMap::new(),
        };
        let platform = Arc::new(RecordingPlatform {
            counts: HashMap::from([("web".to_string(), 2)]),
            ..Default::default()
        });
        let mut e = engine(config(""), metrics, platform);
        e.init_instances().await;
        e.iterate().await.unwrap();
        assert!(!e.last_actions().is_empty());

        let fresh = DecisionEngine::from_parts(e.parts());
        assert!(fresh.last_actions().is_empty());
        assert_eq!(fresh.instance_state().count_of("web"), Some(6));
        e.settings().set_rules(Vec::new());
        fresh.settings().add_rule(rlscale_core::ScalingRule::new(
            "web",
            rlscale_core::Relation::LessEqual,
            4,
        ));
        assert_eq!(e.settings().rules().len(), 1);
    }

    #[test]
    fn kpi_definition_query_defaults_to_name() {
        assert_eq!(KpiDefinition::new("latency", 1.0).query(), "latency");
    }
}
