//! Request-scoped error taxonomy for document generation.
//!
//! Every failure of a turn maps to exactly one [`GenerateError`] variant, and
//! every variant carries a stable machine-readable code so clients can branch
//! on the kind instead of matching message text.

use thiserror::Error;

/// Errors surfaced by [`crate::generation::Generator`] and the session store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    /// The named template could not be loaded. A configuration problem on the
    /// server side; never retried.
    #[error("template not found: {0}")]
    MissingTemplate(String),

    /// A variable declared by the template was absent from the request fields.
    #[error("template '{template}' requires field '{variable}'")]
    MissingVariable { template: String, variable: String },

    /// The external model call failed (network, auth, quota, malformed
    /// response or timeout).
    #[error("upstream model error: {0}")]
    Upstream(String),

    /// No history exists for the session id.
    #[error("session not found: {0}")]
    SessionNotFound(String),
}

impl GenerateError {
    /// Stable error code exposed to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingTemplate(_) => "MISSING_TEMPLATE",
            Self::MissingVariable { .. } => "MISSING_VARIABLE",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
        }
    }

    /// True when the caller's input caused the failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::MissingVariable { .. } | Self::SessionNotFound(_)
        )
    }
}
