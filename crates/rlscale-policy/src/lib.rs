//! rlscale-policy: per-app scaling policies.
//!
//! Three independent policies turn one interval's measurements into at most
//! one proposal per app. A [`PolicyDispatcher`] fans the measurements out by
//! app and keeps one policy instance per app alive for the process lifetime.
//!
//! # Policies
//!
//! ```text
//! reactive:  any KPI over its SLO?
//!                target = max over violated KPIs of ceil(current * value / slo)
//!
//! proactive: healthy for more than backoff[level] intervals?
//!                target = current - 1          (explorative downscale)
//!            trained model present?
//!                target = current + argmax_a Q(state + reward, a), a ∈ {-1, 0, +1}
//!                (a = 0 defers to the explorative downscale)
//!
//! safety:    target = floor(min(healthy instance counts over `period` intervals) / ratio)
//!                proposed only when above the current count
//! ```
//!
//! Every policy fails closed: if any configured KPI is missing from the
//! measurements, no proposal is made for that app.

pub mod dispatcher;
pub mod error;
pub mod model;
pub mod policy;
pub mod proactive;
pub mod reactive;
pub mod reward;
pub mod safety;
pub mod slo;

pub use dispatcher::{DispatchOutcome, PolicyDispatcher, PolicyFailure};
pub use error::PolicyError;
pub use model::{ActionSpace, LinearValueModel, ModelProvider, ModelRegistry, ValueModel};
pub use policy::{AppPolicy, PolicyInput, PolicyKind};
pub use proactive::ProactivePolicy;
pub use reactive::ReactivePolicy;
pub use reward::{ImprovedReward, RewardFunction, SimpleReward};
pub use safety::SafetyPolicy;
