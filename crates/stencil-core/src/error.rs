// Error taxonomy surfaced to callers of the template service
//
// Callers never see raw driver/client errors. Adapters report their own error
// types; the service logs those with context and maps them onto these kinds.

use thiserror::Error;

/// Result type alias for template operations
pub type Result<T> = std::result::Result<T, TemplateError>;

/// Coarse error kind, stable across transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    InvariantViolation,
    PartialFailure,
    Unknown,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::InvalidArgument => write!(f, "invalid_argument"),
            ErrorCode::NotFound => write!(f, "not_found"),
            ErrorCode::AlreadyExists => write!(f, "already_exists"),
            ErrorCode::InvariantViolation => write!(f, "invariant_violation"),
            ErrorCode::PartialFailure => write!(f, "partial_failure"),
            ErrorCode::Unknown => write!(f, "unknown"),
        }
    }
}

/// Errors returned by workflow template operations
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Manifest failed to parse or validate, or an argument is unusable
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No relational row, or zero cluster objects matched
    #[error("{0} not found")]
    NotFound(String),

    /// Identity or name already taken in the namespace
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// The two stores disagree in a way a single read cannot resolve
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Relational state advanced but the cluster store did not follow.
    /// Retrying the whole operation is safe.
    #[error("version {version} recorded but cluster store update failed: {message}")]
    PartialFailure { version: i64, message: String },

    /// Opaque store failure; details are only in the logs
    #[error("unknown error")]
    Unknown,
}

impl TemplateError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        TemplateError::InvalidArgument(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        TemplateError::NotFound(what.into())
    }

    pub fn already_exists(what: impl Into<String>) -> Self {
        TemplateError::AlreadyExists(what.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        TemplateError::InvariantViolation(msg.into())
    }

    pub fn partial(version: i64, msg: impl Into<String>) -> Self {
        TemplateError::PartialFailure {
            version,
            message: msg.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            TemplateError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            TemplateError::NotFound(_) => ErrorCode::NotFound,
            TemplateError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            TemplateError::InvariantViolation(_) => ErrorCode::InvariantViolation,
            TemplateError::PartialFailure { .. } => ErrorCode::PartialFailure,
            TemplateError::Unknown => ErrorCode::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(
            TemplateError::not_found("workflow template").code(),
            ErrorCode::NotFound
        );
        assert_eq!(TemplateError::partial(42, "boom").code(), ErrorCode::PartialFailure);
        assert_eq!(ErrorCode::InvariantViolation.to_string(), "invariant_violation");
    }

    #[test]
    fn test_unknown_hides_details() {
        assert_eq!(TemplateError::Unknown.to_string(), "unknown error");
    }
}
