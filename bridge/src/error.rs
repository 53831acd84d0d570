//! Bridge error types.

use thiserror::Error;

use crate::engine::{EngineError, EngineEvent};
use crate::preflight::PreflightFailure;
use crate::state::{SessionState, Transition};

/// Errors reported by a render session.
///
/// Failures inside a start call are converted into one of these at the
/// session boundary after a non-blocking teardown, so the session is never
/// left half-initialized.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// License or capability check failed. Nothing was started.
    #[error("preflight failed: {0}")]
    Preflight(#[from] PreflightFailure),
    /// The scene exporter raised while populating the scene graph.
    #[error("scene export failed: {0}")]
    Export(#[from] ExportError),
    /// The telemetry backend could not be reached.
    #[error("telemetry connection failed: {0}")]
    Connection(#[from] TelemetryError),
    /// The engine SDK rejected a request.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    /// An event already has a live registration in this session.
    #[error("callback for {0:?} is already registered")]
    DuplicateCallback(EngineEvent),
    /// The state machine does not allow this transition.
    #[error("invalid transition {transition:?} from {from:?}")]
    InvalidTransition {
        from: SessionState,
        transition: Transition,
    },
    /// A start was requested while the session is not ready for one.
    #[error("session is busy ({0:?})")]
    Busy(SessionState),
    /// Interactive renders need a display consumer to notify.
    #[error("interactive render started without a display consumer")]
    MissingDisplay,
    /// A session worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    /// The configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Error raised by a [`SceneExporter`](crate::engine::SceneExporter).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ExportError(pub String);

/// Error raised by a [`TelemetryBackend`](crate::engine::TelemetryBackend).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("telemetry backend unreachable: {0}")]
    Unreachable(String),
    #[error("telemetry backend disconnected")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::PreflightCheck;

    #[test]
    fn test_error_display() {
        let err = BridgeError::Export(ExportError("missing camera".to_string()));
        assert_eq!(err.to_string(), "scene export failed: missing camera");

        let err = BridgeError::DuplicateCallback(EngineEvent::Progress);
        assert_eq!(err.to_string(), "callback for Progress is already registered");
    }

    #[test]
    fn test_preflight_converts() {
        let failure = PreflightFailure {
            check: PreflightCheck::License,
            reason: "no license".into(),
        };
        let err: BridgeError = failure.into();
        assert!(matches!(err, BridgeError::Preflight(_)));
        assert_eq!(err.to_string(), "preflight failed: license: no license");
    }
}
