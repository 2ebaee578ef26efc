//! Process-wide app → current instance count map.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use rlscale_core::AppName;

/// Shared view of how many instances each app is running.
///
/// Cloning is cheap and yields a handle to the same map. Writers never hold
/// the lock across an await point, so readers outside the control loop see
/// last-writer-wins values.
#[derive(Debug, Clone, Default)]
pub struct InstanceState {
    counts: Arc<RwLock<HashMap<AppName, u32>>>,
}

impl InstanceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole map, typically with a fresh platform snapshot.
    pub fn replace_all(&self, counts: HashMap<AppName, u32>) {
        *self.counts.write().unwrap_or_else(PoisonError::into_inner) = counts;
    }

    pub fn count_of(&self, app: &str) -> Option<u32> {
        self.counts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(app)
            .copied()
    }

    /// Store a new count and return the delta to the previous one.
    /// An app seen for the first time reports a delta of 0.
    pub fn set_count(&self, app: &str, count: u32) -> i64 {
        let previous = self
            .counts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(app.to_string(), count);
        match previous {
            Some(old) => count as i64 - old as i64,
            None => 0,
        }
    }

    pub fn snapshot(&self) -> HashMap<AppName, u32> {
        self.counts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Known apps, sorted.
    pub fn apps(&self) -> Vec<AppName> {
        let mut apps: Vec<AppName> = self
            .counts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        apps.sort();
        apps
    }
}
