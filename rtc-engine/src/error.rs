//! Error types reported by the engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::w3c_enum;

w3c_enum! {
    /// DOM exception names surfaced to script for failed operations
    DomErrorName {
        /// A mandatory constraint could not be met
        ConstraintNotSatisfied => "ConstraintNotSatisfiedError",
        /// The user or platform refused access to a device
        PermissionDenied => "PermissionDeniedError",
        /// Generic failure inside the engine
        Operation => "OperationError",
        /// The object is not in a state that allows the call
        InvalidState => "InvalidStateError",
        /// A string argument contained characters outside its alphabet
        InvalidCharacter => "InvalidCharacterError",
        /// An argument had the wrong shape
        Type => "TypeError",
    }
}

/// Operational failure reported by the engine
///
/// These are never raised synchronously across the worker/script boundary;
/// the bridge delivers them as error events in the same ordered stream as
/// successful results.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{name}: {message}")]
pub struct EngineError {
    pub name: DomErrorName,
    pub message: String,
    /// Name of the constraint that failed, for `ConstraintNotSatisfiedError`
    pub constraint: Option<String>,
}

impl EngineError {
    pub fn new(name: DomErrorName, message: impl Into<String>) -> Self {
        Self {
            name,
            message: message.into(),
            constraint: None,
        }
    }

    pub fn constraint_not_satisfied(
        constraint: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: DomErrorName::ConstraintNotSatisfied,
            message: message.into(),
            constraint: Some(constraint.into()),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(DomErrorName::PermissionDenied, message)
    }

    pub fn operation(message: impl Into<String>) -> Self {
        Self::new(DomErrorName::Operation, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(DomErrorName::InvalidState, message)
    }

    pub fn invalid_character(message: impl Into<String>) -> Self {
        Self::new(DomErrorName::InvalidCharacter, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(DomErrorName::Type, message)
    }
}

/// Failure to parse a W3C enumeration string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unknown {kind} value: {value:?}")]
    UnknownValue { kind: &'static str, value: String },
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
