use uuid::Uuid;

/// Result type alias for memory operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the Athena memory engine
///
/// The taxonomy splits along retry behavior: transient infrastructure
/// failures are recoverable and retried with backoff, validation and
/// integrity failures are surfaced to the caller unchanged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Schema mismatch: stored version {stored}, supported version {supported}")]
    SchemaMismatch { stored: u32, supported: u32 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Unknown event source kind: {0}")]
    UnknownSource(String),

    #[error("Integrity violation: {reason} (hint: {hint})")]
    IntegrityViolation { reason: String, hint: String },

    #[error("Verification failed: {violations:?}")]
    VerificationFailed { violations: Vec<String> },

    #[error("Record not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid lifecycle transition: {from} -> {to}")]
    InvalidLifecycleTransition { from: String, to: String },

    #[error("Working memory capacity exceeded for project {0}")]
    CapacityExceeded(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Circuit breaker open")]
    CircuitBreakerOpen,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is recoverable (can retry with backoff)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Recoverable errors (can retry with backoff)
            Error::BackendUnavailable(_)
            | Error::Storage(_)
            | Error::Timeout(_)
            | Error::Connection(_)
            | Error::Provider(_)
            | Error::RateLimitExceeded(_)
            | Error::CircuitBreakerOpen
            | Error::Io(_) => true,
            // Non-recoverable errors
            Error::Configuration(_)
            | Error::SchemaMismatch { .. }
            | Error::InvalidInput(_)
            | Error::DimensionMismatch { .. }
            | Error::UnknownSource(_)
            | Error::IntegrityViolation { .. }
            | Error::VerificationFailed { .. }
            | Error::NotFound(_)
            | Error::InvalidLifecycleTransition { .. }
            | Error::CapacityExceeded(_)
            | Error::QuotaExceeded(_)
            | Error::Serialization(_) => false,
        }
    }

    /// Stable error code for user-visible failures
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "E_CONFIG",
            Error::BackendUnavailable(_) => "E_BACKEND_UNAVAILABLE",
            Error::SchemaMismatch { .. } => "E_SCHEMA_MISMATCH",
            Error::Storage(_) => "E_STORAGE",
            Error::Timeout(_) => "E_TIMEOUT",
            Error::Connection(_) => "E_CONNECTION",
            Error::Provider(_) => "E_PROVIDER",
            Error::InvalidInput(_) => "E_INVALID_INPUT",
            Error::DimensionMismatch { .. } => "E_DIMENSION_MISMATCH",
            Error::UnknownSource(_) => "E_UNKNOWN_SOURCE",
            Error::IntegrityViolation { .. } => "E_INTEGRITY",
            Error::VerificationFailed { .. } => "E_VERIFICATION",
            Error::NotFound(_) => "E_NOT_FOUND",
            Error::InvalidLifecycleTransition { .. } => "E_LIFECYCLE",
            Error::CapacityExceeded(_) => "E_CAPACITY",
            Error::QuotaExceeded(_) => "E_QUOTA",
            Error::RateLimitExceeded(_) => "E_RATE_LIMIT",
            Error::CircuitBreakerOpen => "E_BREAKER_OPEN",
            Error::Serialization(_) => "E_SERIALIZATION",
            Error::Io(_) => "E_IO",
        }
    }

    /// Single-line remediation hint for user-visible failures
    #[must_use]
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "fix the named configuration key and restart",
            Error::BackendUnavailable(_) => "check database connectivity and pool limits",
            Error::SchemaMismatch { .. } => "run migrations with a matching binary version",
            Error::Timeout(_) | Error::Connection(_) | Error::Provider(_) => {
                "retry; the operation is transient and backs off automatically"
            }
            Error::InvalidInput(_) => "correct the request payload",
            Error::DimensionMismatch { .. } => {
                "ensure embed.dimension matches the stored vector dimension"
            }
            Error::UnknownSource(_) => "register the source kind before creating it",
            Error::IntegrityViolation { .. } => "archive the record instead of deleting it",
            Error::VerificationFailed { .. } => "inspect violations via the decisions operation",
            Error::CapacityExceeded(_) => "enable eviction or reduce working-memory pressure",
            _ => "see logs for details",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_recoverable() {
        assert!(Error::Timeout("embed".into()).is_recoverable());
        assert!(Error::Connection("reset".into()).is_recoverable());
        assert!(Error::Provider("503".into()).is_recoverable());
        assert!(Error::BackendUnavailable("pool exhausted".into()).is_recoverable());
        assert!(Error::CircuitBreakerOpen.is_recoverable());
    }

    #[test]
    fn test_validation_errors_are_not_recoverable() {
        assert!(!Error::InvalidInput("empty query".into()).is_recoverable());
        assert!(
            !Error::DimensionMismatch {
                expected: 768,
                actual: 384
            }
            .is_recoverable()
        );
        assert!(!Error::UnknownSource("carrier-pigeon".into()).is_recoverable());
        assert!(
            !Error::IntegrityViolation {
                reason: "provenance referenced".into(),
                hint: "archive instead".into()
            }
            .is_recoverable()
        );
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(Error::Configuration("x".into()).code(), "E_CONFIG");
        assert_eq!(
            Error::VerificationFailed { violations: vec![] }.code(),
            "E_VERIFICATION"
        );
        assert_eq!(Error::NotFound(Uuid::new_v4()).code(), "E_NOT_FOUND");
    }

    #[test]
    fn test_integrity_violation_carries_hint() {
        let err = Error::IntegrityViolation {
            reason: "semantic is provenance for 2 consolidated items".into(),
            hint: "archive instead of delete".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("archive instead"));
    }
}
