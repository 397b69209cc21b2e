//! Error types for the converge pipeline.
//!
//! The taxonomy separates fatal graph errors, per-stage failures that halt the
//! pipeline but leave completed work recorded, and the non-retryable external
//! rejections surfaced by the registrar and certificate authority.

use thiserror::Error;

/// The main error type for converge operations.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// The stage graph contains a dependency cycle. Fatal, never retried.
    #[error("{0}")]
    Cycle(#[from] CycleError),

    /// The stage set failed structural validation (unknown or duplicate ids).
    #[error("invalid stage graph: {message}")]
    Validation {
        /// What was wrong with the declared stages.
        message: String,
    },

    /// A stage failed while applying or destroying. Halts the pipeline;
    /// completed upstream stages stay recorded and a re-run resumes here.
    #[error("stage '{stage}' failed: {source}")]
    StageFailed {
        /// The stage that failed.
        stage: String,
        /// The underlying cause, reported verbatim.
        #[source]
        source: Box<ConvergeError>,
    },

    /// The registrar rejected a nameserver update. Non-retryable.
    #[error("registrar rejected update for '{domain}': {reason}")]
    RegistrarRejected {
        /// The domain being delegated.
        domain: String,
        /// The registrar's reason, as returned.
        reason: String,
    },

    /// The certificate authority reported validation failure. Non-retryable;
    /// the DNS challenge records must be examined.
    #[error("certificate validation failed: {reason}")]
    ValidationFailed {
        /// The authority's failure reason.
        reason: String,
    },

    /// Certificate validation did not complete before the deadline. The wait
    /// may be retried once the zone's records are confirmed correct.
    #[error("certificate validation timed out after {waited_secs}s")]
    ValidationTimeout {
        /// How long the waiter polled before giving up.
        waited_secs: u64,
    },

    /// A required configuration value is missing. Raised before any stage
    /// executes.
    #[error("missing required configuration: {field}")]
    MissingConfig {
        /// The absent field.
        field: String,
    },

    /// A stage asked for an upstream handle that was never produced.
    #[error("stage '{stage}' requires output of '{upstream}', which has not run")]
    MissingUpstream {
        /// The consuming stage.
        stage: String,
        /// The absent producer.
        upstream: String,
    },

    /// A cloud provider call failed.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Convergence state could not be loaded or persisted.
    #[error("state error: {0}")]
    State(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvergeError {
    /// Maps the error to the process exit code contract:
    /// 2 for stage failure, 3 for validation timeout, 4 for registrar
    /// rejection, 1 for everything else.
    ///
    /// A `StageFailed` wrapping one of the typed fatal errors surfaces the
    /// cause's code, so `converge apply` exits 4 when the delegation stage
    /// was the one the registrar refused.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::StageFailed { source, .. } => match source.exit_code() {
                1 | 2 => 2,
                code => code,
            },
            Self::ValidationTimeout { .. } => 3,
            Self::RegistrarRejected { .. } => 4,
            _ => 1,
        }
    }

    /// Wraps an error as a stage failure.
    #[must_use]
    pub fn stage_failed(stage: impl Into<String>, cause: ConvergeError) -> Self {
        Self::StageFailed {
            stage: stage.into(),
            source: Box::new(cause),
        }
    }
}

/// Error raised when the declared stage dependencies form a cycle.
#[derive(Debug, Clone, Error)]
#[error("dependency cycle among stages: {}", cycle_path.join(" -> "))]
pub struct CycleError {
    /// The stage ids forming the cycle, first repeated at the end.
    pub cycle_path: Vec<String>,
}

impl CycleError {
    /// Creates a new cycle error from the offending path.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

/// Errors from the cloud provider boundary.
///
/// The split matters for retry policy: transport failures and throttled or
/// 5xx responses are transient and retried locally; everything else
/// propagates unchanged.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The request never produced a response (connect, DNS, timeout).
    #[error("transport failure: {0}")]
    Transport(String),

    /// The provider answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or status text.
        message: String,
    },

    /// The provider's response could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether the failure is worth retrying with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

/// Errors from the registrar boundary.
///
/// `Transient` is retried with bounded backoff by the delegation client;
/// `Rejected` fails immediately and maps to [`ConvergeError::RegistrarRejected`].
#[derive(Debug, Clone, Error)]
pub enum RegistrarError {
    /// Network error, 5xx, or rate-limit response.
    #[error("transient registrar failure: {0}")]
    Transient(String),

    /// Authentication or validation rejection (4xx other than rate-limit,
    /// or an API-level non-success answer).
    #[error("registrar rejected request for '{domain}': {reason}")]
    Rejected {
        /// The domain the request was for.
        domain: String,
        /// The registrar's reason.
        reason: String,
    },
}

impl From<RegistrarError> for ConvergeError {
    fn from(err: RegistrarError) -> Self {
        match err {
            RegistrarError::Transient(reason) => Self::Provider(ProviderError::Transport(reason)),
            RegistrarError::Rejected { domain, reason } => {
                Self::RegistrarRejected { domain, reason }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_display() {
        let err = CycleError::new(vec![
            "zone".to_string(),
            "cert".to_string(),
            "zone".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "dependency cycle among stages: zone -> cert -> zone"
        );
    }

    #[test]
    fn test_exit_codes() {
        let generic = ConvergeError::State("corrupt".to_string());
        assert_eq!(generic.exit_code(), 1);

        let timeout = ConvergeError::ValidationTimeout { waited_secs: 900 };
        assert_eq!(timeout.exit_code(), 3);

        let rejected = ConvergeError::RegistrarRejected {
            domain: "example.com".to_string(),
            reason: "bad key".to_string(),
        };
        assert_eq!(rejected.exit_code(), 4);

        let failed = ConvergeError::stage_failed(
            "edge",
            ConvergeError::Provider(ProviderError::Api {
                status: 500,
                message: "boom".to_string(),
            }),
        );
        assert_eq!(failed.exit_code(), 2);
    }

    #[test]
    fn test_stage_failed_surfaces_typed_cause_code() {
        let err = ConvergeError::stage_failed(
            "delegation",
            ConvergeError::RegistrarRejected {
                domain: "example.com".to_string(),
                reason: "invalid credentials".to_string(),
            },
        );
        assert_eq!(err.exit_code(), 4);

        let err = ConvergeError::stage_failed(
            "certificate",
            ConvergeError::ValidationTimeout { waited_secs: 900 },
        );
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_provider_error_transience() {
        assert!(ProviderError::Transport("reset".to_string()).is_transient());
        assert!(ProviderError::Api { status: 429, message: String::new() }.is_transient());
        assert!(ProviderError::Api { status: 503, message: String::new() }.is_transient());
        assert!(!ProviderError::Api { status: 403, message: String::new() }.is_transient());
        assert!(!ProviderError::Decode("bad json".to_string()).is_transient());
    }

    #[test]
    fn test_registrar_rejection_converts_non_retryably() {
        let err: ConvergeError = RegistrarError::Rejected {
            domain: "example.com".to_string(),
            reason: "NXDOMAIN".to_string(),
        }
        .into();
        assert!(matches!(err, ConvergeError::RegistrarRejected { .. }));
    }
}
