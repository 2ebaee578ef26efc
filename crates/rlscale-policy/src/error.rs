//! Error types for policy evaluation.
//!
//! Only contract breaches are errors. Missing measurements or an untrained
//! model are normal and produce no proposal instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy for app {expected:?} received a measurement for app {found:?}")]
    ForeignMeasurement { expected: String, found: String },

    #[error("backoff level {level} is outside the backoff table (len {len})")]
    BackoffLevel { level: usize, len: usize },

    #[error("action space is empty or no action has a valid prediction")]
    EmptyActionSpace,
}
