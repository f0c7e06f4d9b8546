// src/error.rs
// Error taxonomy for the store engine.
//
// Structural failures (`StoreError`) are fatal to the registry operation
// that raised them and leave the module tree untouched. Handler failures
// (`ActionError`) propagate through the dispatch result and fan out to
// error subscribers. Unknown action/mutation types and strict-mode
// violations are reported through `tracing` instead and never surface as
// errors, so UI event handlers cannot crash on a stale type string.

/// Errors raised synchronously by module-tree registry operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("module already registered at path: {path}")]
    DuplicateModule { path: String },

    #[error("module not found at path: {path}")]
    ModuleNotFound { path: String },

    #[error("namespace collision: two modules or getters map to key '{key}'")]
    NamespaceCollision { key: String },
}

/// Errors produced by action handlers.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("action failed: {message}")]
    Failed { message: String },

    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl ActionError {
    /// Shorthand for handler code bailing out with a message.
    pub fn failed(message: impl Into<String>) -> Self {
        ActionError::Failed {
            message: message.into(),
        }
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        ActionError::Failed { message }
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        ActionError::Failed {
            message: message.to_string(),
        }
    }
}
