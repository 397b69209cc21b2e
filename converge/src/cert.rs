//! Certificate authority boundary and validation waiter.
//!
//! Issuance is asynchronous on the authority's side: the pipeline writes the
//! DNS challenges it is handed, then polls status at an increasing interval
//! until the certificate is issued, the authority reports failure, or the
//! deadline elapses. A poll still in flight at the deadline is abandoned.

use crate::config::ValidationConfig;
use crate::errors::{ConvergeError, ProviderError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A DNS record the authority demands to prove domain control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationChallenge {
    /// Record name to create.
    pub record_name: String,
    /// Record type (typically CNAME).
    pub record_type: String,
    /// Record value the authority expects to resolve.
    pub record_value: String,
}

/// An accepted certificate request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRequest {
    /// Identifier to poll status with.
    pub request_id: String,
    /// The challenges to write into the hosted zone.
    pub challenges: Vec<ValidationChallenge>,
}

/// The authority's view of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateStatus {
    /// Validation still in progress.
    Pending,
    /// Certificate issued.
    Issued {
        /// The issued certificate's identifier.
        certificate_id: String,
    },
    /// Validation failed; the DNS records must be examined.
    Failed {
        /// The authority's reason.
        reason: String,
    },
}

/// Certificate authority boundary.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Requests a certificate for the domain, returning the request id and
    /// the validation challenges to satisfy.
    async fn request_certificate(
        &self,
        domain: &str,
    ) -> Result<CertificateRequest, ProviderError>;

    /// Reads the current status of a request.
    async fn status(&self, request_id: &str) -> Result<CertificateStatus, ProviderError>;
}

/// Polls a [`CertificateAuthority`] until issuance, failure, or deadline.
pub struct ValidationWaiter {
    authority: Arc<dyn CertificateAuthority>,
    initial_interval: Duration,
    max_interval: Duration,
    max_wait: Duration,
}

impl ValidationWaiter {
    /// Creates a waiter from validation configuration.
    #[must_use]
    pub fn new(authority: Arc<dyn CertificateAuthority>, config: &ValidationConfig) -> Self {
        Self {
            authority,
            initial_interval: Duration::from_secs(config.initial_poll_secs),
            max_interval: Duration::from_secs(config.max_poll_secs),
            max_wait: Duration::from_secs(config.max_wait_secs),
        }
    }

    /// Polls until the request resolves.
    ///
    /// # Errors
    ///
    /// [`ConvergeError::ValidationFailed`] when the authority reports
    /// failure (non-retryable), [`ConvergeError::ValidationTimeout`] when
    /// the deadline elapses first (the wait may be retried once the zone's
    /// records are confirmed correct). Transient poll errors are logged and
    /// absorbed into the next poll.
    pub async fn wait_for_validation(&self, request_id: &str) -> Result<String, ConvergeError> {
        let started = Instant::now();
        let deadline = started + self.max_wait;
        let mut interval = self.initial_interval;

        loop {
            let remaining = deadline.duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.timeout(started));
            }

            // Bound the in-flight call by the deadline; on expiry it is
            // abandoned, not awaited.
            let status = tokio::time::timeout(remaining, self.authority.status(request_id)).await;
            match status {
                Err(_) => return Err(self.timeout(started)),
                Ok(Err(e)) if e.is_transient() => {
                    tracing::warn!(request_id, error = %e, "status poll failed, will poll again");
                }
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(CertificateStatus::Issued { certificate_id })) => {
                    tracing::info!(
                        request_id,
                        certificate_id = %certificate_id,
                        waited_secs = started.elapsed().as_secs(),
                        "certificate issued"
                    );
                    return Ok(certificate_id);
                }
                Ok(Ok(CertificateStatus::Failed { reason })) => {
                    return Err(ConvergeError::ValidationFailed { reason });
                }
                Ok(Ok(CertificateStatus::Pending)) => {
                    tracing::debug!(request_id, "certificate still pending");
                }
            }

            let remaining = deadline.duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.timeout(started));
            }
            tokio::time::sleep(interval.min(remaining)).await;
            interval = (interval * 2).min(self.max_interval);
        }
    }

    fn timeout(&self, started: Instant) -> ConvergeError {
        ConvergeError::ValidationTimeout {
            waited_secs: started.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedAuthority;

    fn fast_config() -> ValidationConfig {
        ValidationConfig {
            max_wait_secs: 1,
            initial_poll_secs: 0,
            max_poll_secs: 0,
        }
    }

    #[tokio::test]
    async fn test_waiter_returns_handle_once_issued() {
        let authority = Arc::new(ScriptedAuthority::with_statuses(vec![
            CertificateStatus::Pending,
            CertificateStatus::Pending,
            CertificateStatus::Issued {
                certificate_id: "cert-1".to_string(),
            },
        ]));
        let waiter = ValidationWaiter::new(authority.clone(), &fast_config());

        let cert = waiter.wait_for_validation("req-1").await.expect("issued");
        assert_eq!(cert, "cert-1");
        assert_eq!(authority.status_calls(), 3);
    }

    #[tokio::test]
    async fn test_waiter_surfaces_failure_as_non_retryable() {
        let authority = Arc::new(ScriptedAuthority::with_statuses(vec![
            CertificateStatus::Pending,
            CertificateStatus::Failed {
                reason: "CAA record forbids issuance".to_string(),
            },
        ]));
        let waiter = ValidationWaiter::new(authority, &fast_config());

        let err = waiter.wait_for_validation("req-1").await.expect_err("failed");
        assert!(matches!(err, ConvergeError::ValidationFailed { .. }));
    }

    #[tokio::test]
    async fn test_waiter_times_out_on_endless_pending() {
        tokio::time::pause();
        let authority = Arc::new(ScriptedAuthority::with_statuses(vec![
            CertificateStatus::Pending,
        ]));
        let config = ValidationConfig {
            max_wait_secs: 30,
            initial_poll_secs: 10,
            max_poll_secs: 60,
        };
        let waiter = ValidationWaiter::new(authority, &config);

        let err = waiter.wait_for_validation("req-1").await.expect_err("timeout");
        assert!(matches!(err, ConvergeError::ValidationTimeout { .. }));
    }

    #[tokio::test]
    async fn test_waiter_abandons_hanging_poll_at_deadline() {
        tokio::time::pause();
        let authority = Arc::new(ScriptedAuthority::hanging());
        let config = ValidationConfig {
            max_wait_secs: 5,
            initial_poll_secs: 1,
            max_poll_secs: 60,
        };
        let waiter = ValidationWaiter::new(authority, &config);

        let err = waiter.wait_for_validation("req-1").await.expect_err("timeout");
        assert!(matches!(err, ConvergeError::ValidationTimeout { .. }));
    }

    #[tokio::test]
    async fn test_waiter_absorbs_transient_poll_errors() {
        let authority = Arc::new(
            ScriptedAuthority::with_statuses(vec![CertificateStatus::Issued {
                certificate_id: "cert-2".to_string(),
            }])
            .failing_transiently(1),
        );
        let waiter = ValidationWaiter::new(authority, &fast_config());

        let cert = waiter.wait_for_validation("req-1").await.expect("issued");
        assert_eq!(cert, "cert-2");
    }
}
