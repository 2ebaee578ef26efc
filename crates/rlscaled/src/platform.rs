//! Dry-run platform connector: remembers counts, resizes nothing.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use rlscale_core::{AppName, PlatformConnector, ScalingRequest, ScalingResponse};
use tracing::info;

pub struct DryRunPlatform {
    counts: RwLock<HashMap<AppName, u32>>,
}

impl DryRunPlatform {
    /// Seed with platform app name → instance count.
    pub fn new(initial: &BTreeMap<String, u32>) -> Self {
        Self {
            counts: RwLock::new(initial.iter().map(|(k, v)| (k.clone(), *v)).collect()),
        }
    }
}

#[async_trait]
impl PlatformConnector for DryRunPlatform {
    async fn current_instances(&self) -> anyhow::Result<HashMap<AppName, u32>> {
        Ok(self
            .counts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn scale(&self, request: &ScalingRequest) -> ScalingResponse {
        let Ok(count) = u32::try_from(request.instances) else {
            return ScalingResponse::failed(format!("invalid instance count {}", request.instances));
        };
        if count == 0 {
            return ScalingResponse::failed("refusing to scale to zero instances");
        }
        let previous = self
            .counts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request.app.clone(), count);
        info!(app = %request.app, from = ?previous, to = count, "dry run: scale");
        ScalingResponse::ok()
    }
}
