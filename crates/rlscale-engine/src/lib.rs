//! rlscale-engine: turns policy proposals into scaling commands.
//!
//! The [`DecisionEngine`] owns one [`PolicyDispatcher`] per policy kind and
//! runs them once per scaling interval. Their proposals are merged, floored,
//! clamped to operator rules and rate limited by the [`ConstraintPipeline`]
//! before being sent to the platform. The [`EngineController`] starts and
//! stops the loop as a single background task.
//!
//! [`PolicyDispatcher`]: rlscale_policy::PolicyDispatcher

pub mod controller;
pub mod engine;
pub mod error;
pub mod exposition;
pub mod instances;
pub mod pipeline;
pub mod ratelimit;
pub mod rules;
pub mod settings;

pub use controller::{ControllerState, EngineController};
pub use engine::{DecisionEngine, EngineParts, IterationReport, ReportCallback, epoch_ms};
pub use error::ControllerError;
pub use exposition::render_prometheus;
pub use instances::InstanceState;
pub use pipeline::{ConstraintPipeline, Proposals, apply_logical_floor, merge};
pub use ratelimit::{Direction, RateLimiter};
pub use rules::clamp_to_rules;
pub use settings::{LiveSettings, SettingsSnapshot};
