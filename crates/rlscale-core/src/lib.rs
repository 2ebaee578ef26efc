pub mod config;
pub mod connector;
pub mod error;
pub mod types;

pub use config::AutoscalerConfig;
pub use connector::{MetricsSource, PlatformConnector, TrainingDataSink};
pub use error::ConfigError;
pub use types::*;
