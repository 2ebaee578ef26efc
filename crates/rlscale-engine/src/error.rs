//! Error types for the engine controller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("decision engine is already running")]
    AlreadyRunning,

    #[error("decision engine is not running")]
    NotRunning,

    #[error("decision engine task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
