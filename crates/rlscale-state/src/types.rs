//! Stored row types.

use std::collections::BTreeMap;

use rlscale_core::AppName;
use serde::{Deserialize, Serialize};

/// Build the table key for an app row at `time_ms`.
pub fn row_key(app: &str, time_ms: u64) -> String {
    format!("{app}:{time_ms:020}")
}

/// Split a table key into app and time.
pub fn parse_row_key(key: &str) -> Option<(&str, u64)> {
    let (app, time) = key.rsplit_once(':')?;
    Some((app, time.parse().ok()?))
}

/// The measurements of one app at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub app: AppName,
    pub time_ms: u64,
    /// metric name → value
    pub values: BTreeMap<String, f64>,
}

impl MeasurementRecord {
    pub fn table_key(&self) -> String {
        row_key(&self.app, self.time_ms)
    }
}

/// A scaling round for one app: the state it saw and the delta executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub app: AppName,
    pub time_ms: u64,
    pub values: BTreeMap<String, f64>,
    pub action: i64,
}

impl ActionRecord {
    pub fn table_key(&self) -> String {
        row_key(&self.app, self.time_ms)
    }
}

/// Value used for a column that was not measured in a row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MissingValueStrategy {
    Constant(f64),
}

impl MissingValueStrategy {
    pub fn fill(&self) -> f64 {
        match self {
            MissingValueStrategy::Constant(v) => *v,
        }
    }
}

impl Default for MissingValueStrategy {
    fn default() -> Self {
        MissingValueStrategy::Constant(-1.0)
    }
}

/// One dense row for model fitting: values in the requested column order.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub time_ms: u64,
    pub values: Vec<f64>,
    pub action: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_sort_by_time_within_app() {
        assert!(row_key("web", 9) < row_key("web", 10));
        assert_eq!(row_key("web", 42), "web:00000000000000000042");
        assert_eq!(parse_row_key("a:b:00000000000000000042"), Some(("a:b", 42)));
        assert_eq!(parse_row_key("garbage"), None);
    }

    #[test]
    fn missing_values_default_to_minus_one() {
        assert_eq!(MissingValueStrategy::default().fill(), -1.0);
    }
}
