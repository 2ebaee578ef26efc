//! Start/stop control for the decision engine.
//!
//! The controller owns the engine while it is idle. Starting moves the
//! engine into a spawned task; stopping signals that task, waits for the
//! iteration in flight to finish and takes the engine back, so policy and
//! rate-limit state survive a restart. At most one loop runs at a time.
//!
//! A run that panics loses its engine. The controller then rebuilds one
//! from the parts it captured at construction and is idle again.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::engine::{DecisionEngine, EngineParts};
use crate::error::ControllerError;
use crate::instances::InstanceState;
use crate::settings::LiveSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running,
}

struct Running {
    handle: JoinHandle<DecisionEngine>,
    shutdown_tx: watch::Sender<bool>,
}

pub struct EngineController {
    idle: Option<Box<DecisionEngine>>,
    running: Option<Running>,
    parts: EngineParts,
}

impl EngineController {
    pub fn new(engine: DecisionEngine) -> Self {
        Self {
            parts: engine.parts(),
            idle: Some(Box::new(engine)),
            running: None,
        }
    }

    pub fn state(&self) -> ControllerState {
        if self.running.is_some() {
            ControllerState::Running
        } else {
            ControllerState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Instance counts, readable while the loop runs.
    pub fn instance_state(&self) -> InstanceState {
        self.parts.instance_state()
    }

    /// Operator-editable settings, writable while the loop runs.
    pub fn settings(&self) -> LiveSettings {
        self.parts.settings()
    }

    /// The idle engine, e.g. to drive single iterations by hand.
    pub fn engine_mut(&mut self) -> Option<&mut DecisionEngine> {
        if self.running.is_some() {
            return None;
        }
        Some(self.idle_engine())
    }

    /// Spawn the control loop. Must be called within a tokio runtime.
    pub fn start(&mut self) -> Result<(), ControllerError> {
        if self.running.is_some() {
            return Err(ControllerError::AlreadyRunning);
        }
        let mut engine = match self.idle.take() {
            Some(engine) => *engine,
            None => rebuild(&self.parts),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            engine.run(shutdown_rx).await;
            engine
        });
        self.running = Some(Running {
            handle,
            shutdown_tx,
        });
        info!("decision engine start requested");
        Ok(())
    }

    /// Stop the control loop and wait for it to wind down.
    ///
    /// If the run had panicked the error is returned; the controller is idle
    /// either way and the next start runs a freshly built engine.
    pub async fn stop(&mut self) -> Result<(), ControllerError> {
        let Some(running) = self.running.as_mut() else {
            return Err(ControllerError::NotRunning);
        };
        let _ = running.shutdown_tx.send(true);
        let joined = (&mut running.handle).await;
        self.running = None;

        match joined {
            Ok(engine) => {
                self.idle = Some(Box::new(engine));
                info!("decision engine stop complete");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "decision engine task failed");
                Err(ControllerError::Join(e))
            }
        }
    }

    fn idle_engine(&mut self) -> &mut DecisionEngine {
        let parts = &self.parts;
        self.idle
            .get_or_insert_with(|| Box::new(rebuild(parts)))
            .as_mut()
    }
}

/// A fresh engine for a run that was lost.
fn rebuild(parts: &EngineParts) -> DecisionEngine {
    warn!("rebuilding decision engine after a failed run");
    DecisionEngine::from_parts(parts.clone())
}
