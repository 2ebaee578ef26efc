//! Error types for configuration loading and validation.

use thiserror::Error;

/// Errors that can occur while loading or validating an [`AutoscalerConfig`].
///
/// [`AutoscalerConfig`]: crate::AutoscalerConfig
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no KPI definitions configured")]
    NoKpis,

    #[error("app {0:?} has an empty KPI list")]
    EmptyKpiList(String),

    #[error("invalid KPI {name:?} for app {app:?}: {reason}")]
    InvalidKpi {
        app: String,
        name: String,
        reason: String,
    },

    #[error("{field} must be greater than zero")]
    ZeroInterval { field: &'static str },

    #[error("invalid regex in {field}: {source}")]
    Regex {
        field: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("scaling rule #{0} has an empty app name")]
    RuleWithoutApp(usize),
}
