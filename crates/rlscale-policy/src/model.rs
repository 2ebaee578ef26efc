//! Value-model contract and the per-app model registry.
//!
//! Model fitting happens outside the control loop. The loop only needs to
//! know whether an app has a model and which action that model values most.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use rlscale_core::Metric;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PolicyError;

/// The instance-count deltas a model chooses among.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSpace {
    actions: Vec<i64>,
}

impl ActionSpace {
    pub fn new(actions: Vec<i64>) -> Self {
        Self { actions }
    }

    pub fn actions(&self) -> &[i64] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Default for ActionSpace {
    /// Remove one instance, do nothing, or add one instance.
    fn default() -> Self {
        Self::new(vec![-1, 0, 1])
    }
}

/// A fitted model estimating the value of each action in a given state.
pub trait ValueModel: Send + Sync {
    /// Expected value per action of `space`.
    fn predict_values(&self, state: &[Metric], space: &ActionSpace) -> BTreeMap<i64, f64>;

    /// The action with the highest predicted value.
    fn predict_best_action(&self, state: &[Metric], space: &ActionSpace) -> Result<i64, PolicyError> {
        if space.is_empty() {
            return Err(PolicyError::EmptyActionSpace);
        }
        best_action(&self.predict_values(state, space))
    }
}

/// Arg-max over predicted values. Ties go to the smallest action; NaN
/// predictions never win.
pub fn best_action(values: &BTreeMap<i64, f64>) -> Result<i64, PolicyError> {
    let mut best: Option<(i64, f64)> = None;
    // BTreeMap iterates in ascending action order, so keeping the first of
    // equal values picks the most conservative action.
    for (&action, &value) in values {
        if value.is_nan() {
            continue;
        }
        if best.is_none_or(|(_, v)| value > v) {
            best = Some((action, value));
        }
    }
    best.map(|(action, _)| action)
        .ok_or(PolicyError::EmptyActionSpace)
}

/// What the proactive policy needs from whoever owns the models.
pub trait ModelProvider: Send + Sync {
    fn is_trained(&self, app: &str) -> bool;

    /// Best action for `app`, or `None` if the app has no model.
    fn predict_best_action(
        &self,
        app: &str,
        state: &[Metric],
        space: &ActionSpace,
    ) -> Result<Option<i64>, PolicyError>;
}

/// Concurrent app → model map, shared between the control loop and
/// whatever installs freshly trained models.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: Arc<RwLock<HashMap<String, Arc<dyn ValueModel>>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the model for `app`.
    pub fn set_model(&self, app: &str, model: Arc<dyn ValueModel>) {
        self.models
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(app.to_string(), model);
        debug!(%app, "model installed");
    }

    pub fn remove_model(&self, app: &str) -> bool {
        self.models
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(app)
            .is_some()
    }

    pub fn model_for(&self, app: &str) -> Option<Arc<dyn ValueModel>> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(app)
            .cloned()
    }

    /// Apps that currently have a model.
    pub fn apps(&self) -> Vec<String> {
        let mut apps: Vec<String> = self
            .models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        apps.sort();
        apps
    }
}

impl ModelProvider for ModelRegistry {
    fn is_trained(&self, app: &str) -> bool {
        self.model_for(app).is_some()
    }

    fn predict_best_action(
        &self,
        app: &str,
        state: &[Metric],
        space: &ActionSpace,
    ) -> Result<Option<i64>, PolicyError> {
        // Clone the Arc out so prediction runs without holding the lock.
        match self.model_for(app) {
            Some(model) => model.predict_best_action(state, space).map(Some),
            None => Ok(None),
        }
    }
}

/// A linear value function per action: `intercept[a] + Σ weight[a][f] * state[f]`.
///
/// Features absent from the state contribute nothing. This is the exchange
/// format produced by the offline training stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearValueModel {
    #[serde(default)]
    pub intercepts: BTreeMap<i64, f64>,
    #[serde(default)]
    pub weights: BTreeMap<i64, BTreeMap<String, f64>>,
}

impl LinearValueModel {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl ValueModel for LinearValueModel {
    fn predict_values(&self, state: &[Metric], space: &ActionSpace) -> BTreeMap<i64, f64> {
        space
            .actions()
            .iter()
            .map(|&action| {
                let intercept = self.intercepts.get(&action).copied().unwrap_or(0.0);
                let weighted: f64 = self
                    .weights
                    .get(&action)
                    .map(|w| {
                        state
                            .iter()
                            .filter_map(|m| w.get(&m.name).map(|weight| weight * m.value))
                            .sum()
                    })
                    .unwrap_or(0.0);
                (action, intercept + weighted)
            })
            .collect()
    }
}
