use thiserror::Error;

/// Error categories that callers are expected to match on.
///
/// Everything else in the crate flows as `anyhow::Error` with context;
/// these variants exist so the command layer can distinguish "your
/// tutorial is malformed" from "your credentials are missing" from
/// "the endpoint never came up".
#[derive(Debug, Error)]
pub enum TutorboxError {
    /// Malformed tutorial spec. Fatal, raised before any cloud call.
    #[error("invalid tutorial: {0}")]
    Validation(String),

    /// Cloud credentials missing or rejected at client construction.
    #[error("not authenticated to {backend}; check your credentials")]
    Authentication { backend: &'static str },

    /// Backend does not support the requested operation.
    #[error("{backend} does not implement {operation}")]
    NotImplemented {
        backend: &'static str,
        operation: &'static str,
    },

    /// Required environment variable was not supplied with --env.
    #[error("environment variable {name} is required but not present, add it with --env")]
    MissingEnv { name: String },

    /// The readiness prober exhausted its attempt budget.
    #[error("endpoint {url} not ready after {attempts} attempts")]
    ReadinessTimeout { url: String, attempts: u32 },
}

impl TutorboxError {
    pub fn validation(msg: impl Into<String>) -> Self {
        TutorboxError::Validation(msg.into())
    }
}
