//! Error taxonomy for the bridge and the engine adapter.
//!
//! Every failure that can cross the process boundary has a named variant and
//! maps onto one [`ErrorKind`] wire tag.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The engine module could not be resolved or started. Fatal to the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("unknown engine module: {0}")]
    NotFound(String),

    #[error("no engine module named and no default module configured")]
    NoModule,

    #[error("engine module `{module}` failed to initialize: {reason}")]
    Init { module: String, reason: String },

    #[error("engine module `{module}` did not load within {millis} ms")]
    Timeout { module: String, millis: u64 },
}

/// A single command could not be executed. The bridge keeps serving.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("engine not ready")]
    NotReady,

    #[error("execution fault: {0}")]
    ExecutionFault(String),

    #[error("command timed out after {0} ms")]
    Timeout(u64),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("pending queue is full ({0} commands)")]
    QueueFull(usize),

    #[error("host disconnected")]
    Disconnected,
}

impl BridgeError {
    /// The wire tag an error notice carries for this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Load(_) => ErrorKind::Load,
            BridgeError::Engine(EngineError::NotReady) => ErrorKind::NotReady,
            BridgeError::Engine(EngineError::ExecutionFault(_)) => ErrorKind::Fault,
            BridgeError::Engine(EngineError::Timeout(_)) => ErrorKind::Timeout,
            BridgeError::Malformed(_) => ErrorKind::Malformed,
            BridgeError::QueueFull(_) => ErrorKind::QueueFull,
            // Never reaches the host, there is nobody left to tell.
            BridgeError::Disconnected => ErrorKind::Fault,
        }
    }
}

/// Error category carried by `{"cmd":"error"}` notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Load,
    NotReady,
    Fault,
    Timeout,
    QueueFull,
    Malformed,
}

pub type BridgeResult<T> = Result<T, BridgeError>;
