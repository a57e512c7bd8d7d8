//! Error types for the script bridge.
//!
//! Synchronous failures (bad parameters, marshalling problems) surface as
//! [`BridgeError`] at the call site. Failures of asynchronous operations are
//! never thrown; they travel as a [`CompletionError`] in the first position
//! of an error-first completion callback.

use serde::{Deserialize, Serialize};

/// Codes categorizing asynchronous operation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionCode {
    /// Requested deployable unit does not exist
    UnitNotFound,
    /// Unit was found but an instance failed to start
    InstantiationFailed,
    /// The main/name identifier was malformed
    InvalidMain,
    /// Deployment id passed to undeploy is unknown
    DeploymentNotFound,
    /// Server failed to bind/listen
    ListenFailed,
    /// Client failed to connect
    ConnectFailed,
    /// Filesystem operation failed
    Io,
    /// Internal host error (bug)
    InternalError,
}

impl std::fmt::Display for CompletionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionCode::UnitNotFound => write!(f, "UNIT_NOT_FOUND"),
            CompletionCode::InstantiationFailed => write!(f, "INSTANTIATION_FAILED"),
            CompletionCode::InvalidMain => write!(f, "INVALID_MAIN"),
            CompletionCode::DeploymentNotFound => write!(f, "DEPLOYMENT_NOT_FOUND"),
            CompletionCode::ListenFailed => write!(f, "LISTEN_FAILED"),
            CompletionCode::ConnectFailed => write!(f, "CONNECT_FAILED"),
            CompletionCode::Io => write!(f, "IO"),
            CompletionCode::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

/// Failure description delivered through error-first completion callbacks.
///
/// On success the callback's error position holds a null value; on failure it
/// holds this structure, converted to a scripting-layer map at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionError {
    /// Error code
    pub code: CompletionCode,

    /// Human-readable message
    pub message: String,

    /// Additional context for debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl CompletionError {
    /// Create a new completion error
    pub fn new(code: CompletionCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
        }
    }

    /// Create a unit-not-found error
    pub fn unit_not_found(name: impl Into<String>) -> Self {
        Self::new(
            CompletionCode::UnitNotFound,
            format!("Deployable unit '{}' not found", name.into()),
        )
    }

    /// Create an instantiation failure error
    pub fn instantiation_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            CompletionCode::InstantiationFailed,
            format!(
                "Failed to start instance of '{}': {}",
                name.into(),
                reason.into()
            ),
        )
    }

    /// Create an invalid-main error
    pub fn invalid_main(main: impl Into<String>) -> Self {
        Self::new(
            CompletionCode::InvalidMain,
            format!("Invalid main identifier '{}'", main.into()),
        )
    }

    /// Create a deployment-not-found error
    pub fn deployment_not_found(id: impl Into<String>) -> Self {
        Self::new(
            CompletionCode::DeploymentNotFound,
            format!("No deployment with id '{}'", id.into()),
        )
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(CompletionCode::Io, message)
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CompletionCode::InternalError, message)
    }

    /// Add context
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

impl std::fmt::Display for CompletionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for CompletionError {}

/// Errors raised synchronously while converting between the scripting
/// layer's generic values and the host's typed tree format
#[derive(Debug, Clone, thiserror::Error)]
pub enum MarshalError {
    /// Map keys must be strings
    #[error("Map key must be a string, got {kind}")]
    NonStringKey {
        /// Kind of the offending key value
        kind: &'static str,
    },

    /// Value kind has no host representation
    #[error("Value of kind {kind} cannot be marshalled")]
    Unsupported {
        /// Kind of the offending value
        kind: &'static str,
    },
}

/// Kind of fault raised out of a handler invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Callable arity did not match the declared contract
    Binding,
    /// The scripting-layer callable itself raised
    Script,
}

/// Failure propagating out of a handler invocation.
///
/// These are scripting-author bugs; the adapter never swallows them. They are
/// routed to the owning context's fault hook, which isolates the failure to
/// the current unit.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct HandlerFault {
    /// What kind of fault this is
    pub kind: FaultKind,
    /// Human-readable message
    pub message: String,
}

impl HandlerFault {
    /// Create a binding fault (arity contract violated at invocation time)
    pub fn binding(expected: usize, actual: usize) -> Self {
        Self {
            kind: FaultKind::Binding,
            message: format!(
                "Callable arity mismatch: contract requires {} argument(s), callable takes {}",
                expected, actual
            ),
        }
    }

    /// Create a script fault (the callable raised)
    pub fn script(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Script,
            message: message.into(),
        }
    }
}

/// Main error type for synchronous bridge operations
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Bad parameter, detected before any host call
    #[error("Validation error: {field}: {reason}")]
    Validation {
        /// The parameter name
        field: String,
        /// The reason it is invalid
        reason: String,
    },

    /// Marshalling error
    #[error("Marshalling error: {0}")]
    Marshal(#[from] MarshalError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Operation attempted in an invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Host runtime has shut down
    #[error("Shutdown: {0}")]
    Shutdown(String),
}

impl BridgeError {
    /// Create a validation error
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        BridgeError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
