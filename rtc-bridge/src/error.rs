//! Error types for the rtc-bridge crate
//!
//! Only local, synchronous failures live here. Failures of asynchronous
//! engine operations are delivered as `RtcEvent::Error` through the
//! callback queue instead.

use rtc_engine::EngineError;

use crate::event::EventKind;
use crate::logging::LoggingError;

/// Errors returned directly by bridge calls
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The engine provider failed to build the audio device or factory
    #[error("Failed to construct engine factory: {0}")]
    FactoryCreation(#[source] EngineError),

    /// The worker thread could not be started
    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    /// The worker thread has shut down and accepts no more work
    #[error("Worker thread is not running")]
    WorkerStopped,

    /// A blocking worker call was made from inside an async runtime
    #[error("Cannot block on the worker thread from inside an async runtime")]
    BlockingInRuntime,

    /// The peer connection was closed or is being torn down
    #[error("Peer connection is closed")]
    Closed,

    /// A synchronous engine call failed
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// No script callback slot carries this name
    #[error("Unknown callback name: {0}")]
    UnknownCallback(String),

    /// The event kind is delivered to per-request callbacks only
    #[error("Event kind {0:?} has no handler slot")]
    NotASlot(EventKind),

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Configuration JSON could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// A process-wide registry is already installed
    #[error("Global factory registry is already installed")]
    GlobalAlreadyInstalled,

    #[error(transparent)]
    Logging(#[from] LoggingError),
}

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_converts() {
        let err: BridgeError = EngineError::type_error("bad init").into();
        assert!(matches!(err, BridgeError::Engine(_)));
        assert_eq!(err.to_string(), "Engine error: TypeError: bad init");
    }

    #[test]
    fn test_factory_creation_keeps_source() {
        use std::error::Error as _;

        let err = BridgeError::FactoryCreation(EngineError::operation("no devices"));
        assert!(err.source().is_some());
    }
}
