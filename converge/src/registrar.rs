//! External DNS delegation client.
//!
//! Synchronizes the authoritative nameserver set for a domain with the
//! third-party registrar. This is the one genuinely fallible network
//! interaction with retry semantics: transient failures are retried with
//! exponential backoff, rejections fail immediately, and a write only
//! happens after a read has shown the registrar's current set differs.

use crate::config::RegistrarConfig;
use crate::errors::{ConvergeError, RegistrarError};
use crate::retry::{retry_if, RetryPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Registrar API boundary: both operations are idempotent from the caller's
/// perspective.
#[async_trait]
pub trait Registrar: Send + Sync {
    /// Reads the nameservers currently delegated for the domain.
    async fn current_nameservers(&self, domain: &str) -> Result<Vec<String>, RegistrarError>;

    /// Replaces the domain's delegation with the given nameserver set.
    async fn replace_nameservers(
        &self,
        domain: &str,
        nameservers: &[String],
    ) -> Result<(), RegistrarError>;
}

/// Outcome of a delegation sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncOutcome {
    /// The registrar already served the desired set; nothing was written.
    AlreadyInSync,
    /// The delegation was updated and the change confirmed by a re-read.
    Updated,
}

/// Drives nameserver synchronization against a [`Registrar`].
pub struct DelegationClient {
    registrar: Arc<dyn Registrar>,
    retry: RetryPolicy,
    deadline: std::time::Duration,
}

impl DelegationClient {
    /// Overall deadline for one sync, retries included.
    const DEFAULT_DEADLINE: std::time::Duration = std::time::Duration::from_secs(120);

    /// Creates a client with the policy the pipeline ships: base 1s,
    /// factor 2, 5 attempts, 30s delay cap.
    #[must_use]
    pub fn new(registrar: Arc<dyn Registrar>) -> Self {
        Self {
            registrar,
            retry: RetryPolicy::default(),
            deadline: Self::DEFAULT_DEADLINE,
        }
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides the overall sync deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: std::time::Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Converges the registrar's delegation for `domain` onto `desired`.
    ///
    /// The current set is always read first; when it already matches, the
    /// call is a verified no-op. After a write, the set is read back to
    /// confirm the registrar converged. The whole sync, retries included,
    /// is bounded by the client deadline; on expiry the in-flight call is
    /// abandoned.
    ///
    /// # Errors
    ///
    /// [`ConvergeError::RegistrarRejected`] on authentication or validation
    /// failure; transient failures are retried and only surface once the
    /// attempt budget or the deadline is exhausted.
    pub async fn sync_nameservers(
        &self,
        domain: &str,
        desired: &[String],
    ) -> Result<SyncOutcome, ConvergeError> {
        tokio::time::timeout(self.deadline, self.sync_inner(domain, desired))
            .await
            .map_err(|_| {
                ConvergeError::Provider(crate::errors::ProviderError::Transport(format!(
                    "registrar sync for '{domain}' exceeded its {}s deadline",
                    self.deadline.as_secs()
                )))
            })?
    }

    async fn sync_inner(
        &self,
        domain: &str,
        desired: &[String],
    ) -> Result<SyncOutcome, ConvergeError> {
        let want = normalize(desired);
        if want.is_empty() {
            return Err(ConvergeError::MissingConfig {
                field: "nameservers".to_string(),
            });
        }

        let current = self.read(domain).await?;
        if current == want {
            tracing::info!(domain, "registrar delegation already in sync");
            return Ok(SyncOutcome::AlreadyInSync);
        }

        tracing::info!(
            domain,
            from = ?current,
            to = ?want,
            "updating registrar delegation"
        );
        retry_if(
            &self.retry,
            "registrar.replace_nameservers",
            || self.registrar.replace_nameservers(domain, desired),
            |e| matches!(e, RegistrarError::Transient(_)),
        )
        .await
        .map_err(ConvergeError::from)?;

        let confirmed = self.read(domain).await?;
        if confirmed != want {
            return Err(ConvergeError::RegistrarRejected {
                domain: domain.to_string(),
                reason: format!("delegation did not converge: registrar reports {confirmed:?}"),
            });
        }
        tracing::info!(domain, "registrar delegation updated");
        Ok(SyncOutcome::Updated)
    }

    async fn read(&self, domain: &str) -> Result<Vec<String>, ConvergeError> {
        let current = retry_if(
            &self.retry,
            "registrar.current_nameservers",
            || self.registrar.current_nameservers(domain),
            |e| matches!(e, RegistrarError::Transient(_)),
        )
        .await
        .map_err(ConvergeError::from)?;
        Ok(normalize(&current))
    }
}

/// Normalizes a nameserver set for comparison: lowercase, trailing dot
/// stripped, sorted, duplicates removed. Delegation is a set; host case and
/// the trailing root dot are presentation details.
#[must_use]
pub fn normalize(nameservers: &[String]) -> Vec<String> {
    let mut cleaned: Vec<String> = nameservers
        .iter()
        .map(|ns| ns.trim().trim_end_matches('.').to_ascii_lowercase())
        .filter(|ns| !ns.is_empty())
        .collect();
    cleaned.sort();
    cleaned.dedup();
    cleaned
}

#[derive(Debug, Serialize)]
struct PorkbunAuth<'a> {
    secretapikey: &'a str,
    apikey: &'a str,
}

#[derive(Debug, Serialize)]
struct PorkbunUpdateNs<'a> {
    secretapikey: &'a str,
    apikey: &'a str,
    ns: &'a [String],
}

#[derive(Debug, Deserialize)]
struct PorkbunResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    ns: Option<Vec<String>>,
}

/// Porkbun v3 JSON API client.
///
/// Both operations are POSTs carrying the credential pair in the body;
/// success is signalled by `status == "SUCCESS"` rather than the HTTP code
/// alone.
pub struct PorkbunClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    secret_key: String,
}

impl PorkbunClient {
    /// Creates a client from registrar configuration.
    ///
    /// # Errors
    ///
    /// [`ConvergeError::MissingConfig`] when either credential is absent.
    pub fn from_config(config: &RegistrarConfig) -> Result<Self, ConvergeError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConvergeError::MissingConfig {
                field: "registrar.api_key".to_string(),
            })?;
        let secret_key = config
            .secret_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConvergeError::MissingConfig {
                field: "registrar.secret_key".to_string(),
            })?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ConvergeError::State(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            secret_key,
        })
    }

    async fn post<B: Serialize + Sync>(
        &self,
        domain: &str,
        operation: &str,
        body: &B,
    ) -> Result<PorkbunResponse, RegistrarError> {
        let url = format!("{}/domain/{}/{}", self.base_url, operation, domain);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| RegistrarError::Transient(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(RegistrarError::Transient(format!(
                "registrar returned {status}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistrarError::Rejected {
                domain: domain.to_string(),
                reason: format!("{status}: {body}"),
            });
        }

        let parsed: PorkbunResponse = response
            .json()
            .await
            .map_err(|e| RegistrarError::Transient(format!("malformed response: {e}")))?;
        if parsed.status != "SUCCESS" {
            return Err(RegistrarError::Rejected {
                domain: domain.to_string(),
                reason: parsed
                    .message
                    .unwrap_or_else(|| format!("registrar status {}", parsed.status)),
            });
        }
        Ok(parsed)
    }
}

#[async_trait]
impl Registrar for PorkbunClient {
    async fn current_nameservers(&self, domain: &str) -> Result<Vec<String>, RegistrarError> {
        let auth = PorkbunAuth {
            secretapikey: &self.secret_key,
            apikey: &self.api_key,
        };
        let response = self.post(domain, "getNs", &auth).await?;
        Ok(response.ns.unwrap_or_default())
    }

    async fn replace_nameservers(
        &self,
        domain: &str,
        nameservers: &[String],
    ) -> Result<(), RegistrarError> {
        let body = PorkbunUpdateNs {
            secretapikey: &self.secret_key,
            apikey: &self.api_key,
            ns: nameservers,
        };
        let response = self.post(domain, "updateNs", &body).await?;
        tracing::debug!(
            domain,
            message = response.message.as_deref().unwrap_or(""),
            "registrar acknowledged nameserver update"
        );
        Ok(())
    }
}
