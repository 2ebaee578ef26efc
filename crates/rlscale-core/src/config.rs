//! rlscale.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::{KpiDefinition, ScalingRule};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscalerConfig {
    pub scaling: ScalingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub rules: Vec<ScalingRule>,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingConfig {
    /// Start the control loop as soon as the daemon is up.
    #[serde(default)]
    pub autostart: bool,
    /// Minimum time between two scaling decisions.
    pub interval_secs: u64,
    pub upscale: RateLimitConfig,
    pub downscale: RateLimitConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    /// KPIs per app, keyed by the app's metrics name.
    pub kpis: BTreeMap<String, Vec<KpiDefinition>>,
}

/// Cooldown and maximum step for one scaling direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub timeout_secs: u64,
    pub limit: u32,
}

impl RateLimitConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Raw safety settings. Invalid or missing values are not rejected here;
/// the safety policy falls back to a safe default and logs a warning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    pub period: Option<i64>,
    pub ratio: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Cadence of the measurement backend; also bounds the loop's sleep.
    #[serde(default = "default_scrape_interval")]
    pub scrape_interval_secs: u64,
    /// Only metric names matching this regex are imported.
    pub include_regex: Option<String>,
    /// Only apps matching this regex are aggregated.
    pub app_include_regex: Option<String>,
    /// Apps matching this regex are never aggregated.
    pub app_exclude_regex: Option<String>,
    /// Metrics app name → platform app name.
    #[serde(default)]
    pub app_aliases: BTreeMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            scrape_interval_secs: default_scrape_interval(),
            include_regex: None,
            app_include_regex: None,
            app_exclude_regex: None,
            app_aliases: BTreeMap::new(),
        }
    }
}

fn default_scrape_interval() -> u64 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Export measurements and executed actions for offline training.
    #[serde(default)]
    pub export_enabled: bool,
    /// Metric names matching this regex are never stored for training.
    pub exclusion_regex: Option<String>,
    /// Path of the training-data database.
    pub database: Option<PathBuf>,
    /// Rows older than this many days are purged.
    #[serde(default = "default_keep_days")]
    pub keep_days: u32,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            export_enabled: false,
            exclusion_regex: None,
            database: None,
            keep_days: default_keep_days(),
        }
    }
}

fn default_keep_days() -> u32 {
    92
}

/// Settings for the dry-run platform shipped with the daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub initial_instances: BTreeMap<String, u32>,
}

impl AutoscalerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AutoscalerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scaling.kpis.is_empty() {
            return Err(ConfigError::NoKpis);
        }
        for (app, kpis) in &self.scaling.kpis {
            if kpis.is_empty() {
                return Err(ConfigError::EmptyKpiList(app.clone()));
            }
            for kpi in kpis {
                if kpi.name.trim().is_empty() {
                    return Err(ConfigError::InvalidKpi {
                        app: app.clone(),
                        name: kpi.name.clone(),
                        reason: "name is empty".to_string(),
                    });
                }
                if !kpi.slo.is_finite() {
                    return Err(ConfigError::InvalidKpi {
                        app: app.clone(),
                        name: kpi.name.clone(),
                        reason: format!("slo {} is not finite", kpi.slo),
                    });
                }
            }
        }
        if self.scaling.interval_secs == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "scaling.interval_secs",
            });
        }
        if self.metrics.scrape_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "metrics.scrape_interval_secs",
            });
        }
        let regexes = [
            ("metrics.include_regex", &self.metrics.include_regex),
            ("metrics.app_include_regex", &self.metrics.app_include_regex),
            ("metrics.app_exclude_regex", &self.metrics.app_exclude_regex),
            ("training.exclusion_regex", &self.training.exclusion_regex),
        ];
        for (field, pattern) in regexes {
            if let Some(p) = pattern {
                regex::Regex::new(p).map_err(|source| ConfigError::Regex { field, source })?;
            }
        }
        if let Some(idx) = self.rules.iter().position(|r| r.app.trim().is_empty()) {
            return Err(ConfigError::RuleWithoutApp(idx));
        }
        Ok(())
    }

    /// KPI definitions for `app`, if any are configured.
    pub fn kpis_for(&self, app: &str) -> Option<&[KpiDefinition]> {
        self.scaling.kpis.get(app).map(Vec::as_slice)
    }

    /// Map a platform app name to the name the metrics backend uses.
    pub fn metrics_name_for(&self, platform_name: &str) -> String {
        self.metrics
            .app_aliases
            .iter()
            .find(|(_, platform)| platform.as_str() == platform_name)
            .map(|(metrics_name, _)| metrics_name.clone())
            .unwrap_or_else(|| platform_name.to_string())
    }

    /// Map a metrics app name to the platform's name for it.
    pub fn platform_name_for(&self, metrics_name: &str) -> String {
        self.metrics
            .app_aliases
            .get(metrics_name)
            .cloned()
            .unwrap_or_else(|| metrics_name.to_string())
    }

    pub fn scaling_interval(&self) -> Duration {
        Duration::from_secs(self.scaling.interval_secs)
    }

    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.metrics.scrape_interval_secs)
    }

    /// Pause between two loop iterations: the shorter of the scaling and
    /// scrape intervals, so training export keeps its own cadence.
    pub fn loop_interval(&self) -> Duration {
        self.scaling_interval().min(self.scrape_interval())
    }

    /// Scaffold a minimal config for the given apps, one latency KPI each.
    pub fn scaffold(apps: &[&str]) -> Self {
        let kpis = apps
            .iter()
            .map(|app| {
                (
                    app.to_string(),
                    vec![KpiDefinition::new("response_time_p95_ms", 250.0)],
                )
            })
            .collect();
        AutoscalerConfig {
            scaling: ScalingConfig {
                autostart: false,
                interval_secs: 60,
                upscale: RateLimitConfig {
                    timeout_secs: 60,
                    limit: 2,
                },
                downscale: RateLimitConfig {
                    timeout_secs: 180,
                    limit: 1,
                },
                safety: SafetyConfig {
                    period: Some(24),
                    ratio: Some(0.8),
                },
                kpis,
            },
            metrics: MetricsConfig::default(),
            rules: Vec::new(),
            training: TrainingConfig::default(),
            platform: PlatformConfig::default(),
        }
    }
}
