//! Certificate provisioner: request, DNS challenges, validation wait.

use super::{ids, Stage, StageContext};
use crate::cert::{CertificateAuthority, ValidationWaiter};
use crate::config::ValidationConfig;
use crate::errors::ConvergeError;
use crate::handle::ResourceHandle;
use crate::provider::{CloudProvider, ResourceKind};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Requests a TLS certificate for the domain, writes the authority's DNS
/// challenges into the hosted zone, and blocks until the authority reports
/// issuance. Runs after delegation so the challenges resolve on nameservers
/// the world can actually see.
pub struct CertificateProvisioner {
    provider: Arc<dyn CloudProvider>,
    authority: Arc<dyn CertificateAuthority>,
    domain: String,
    validation: ValidationConfig,
}

impl CertificateProvisioner {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        authority: Arc<dyn CertificateAuthority>,
        domain: impl Into<String>,
        validation: ValidationConfig,
    ) -> Self {
        Self {
            provider,
            authority,
            domain: domain.into(),
            validation,
        }
    }
}

#[async_trait]
impl Stage for CertificateProvisioner {
    fn id(&self) -> &str {
        ids::CERTIFICATE
    }

    fn inputs(&self) -> serde_json::Value {
        json!({
            "domain": self.domain,
            "max_wait_secs": self.validation.max_wait_secs,
        })
    }

    async fn apply(&self, ctx: &StageContext) -> Result<ResourceHandle, ConvergeError> {
        let zone = ctx.upstream(ids::ZONE)?;
        let zone_id = zone
            .output_str("zone_id")
            .ok_or_else(|| ConvergeError::MissingUpstream {
                stage: self.id().to_string(),
                upstream: format!("{}.zone_id", ids::ZONE),
            })?;

        let request = self.authority.request_certificate(&self.domain).await?;
        tracing::info!(
            domain = %self.domain,
            request_id = %request.request_id,
            challenges = request.challenges.len(),
            "certificate requested"
        );

        let mut validation_record_ids = Vec::new();
        for challenge in &request.challenges {
            let record = self
                .provider
                .create(
                    ResourceKind::DnsRecord,
                    &json!({
                        "zone_id": zone_id,
                        "name": challenge.record_name,
                        "type": challenge.record_type,
                        "value": challenge.record_value,
                        "ttl": 300,
                    }),
                )
                .await?;
            validation_record_ids.push(record.id);
        }

        let waiter = ValidationWaiter::new(self.authority.clone(), &self.validation);
        let certificate_id = waiter.wait_for_validation(&request.request_id).await?;

        Ok(ResourceHandle::new(certificate_id.clone())
            .with_output("certificate_id", json!(certificate_id))
            .with_output("request_id", json!(request.request_id))
            .with_output("validation_record_ids", json!(validation_record_ids)))
    }

    async fn destroy(&self, handle: &ResourceHandle) -> Result<(), ConvergeError> {
        for id in handle.output_str_list("validation_record_ids") {
            self.provider.delete(ResourceKind::DnsRecord, &id).await?;
        }
        self.provider
            .delete(ResourceKind::Certificate, &handle.id)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{CertificateStatus, ValidationChallenge};
    use crate::testing::{RecordingProvider, ScriptedAuthority};
    use std::collections::HashMap;

    fn ctx_with_zone() -> StageContext {
        let mut upstream = HashMap::new();
        upstream.insert(
            ids::ZONE.to_string(),
            ResourceHandle::new("zone-1")
                .with_output("zone_id", json!("zone-1"))
                .with_output("nameservers", json!(["ns-1.dns.test"])),
        );
        StageContext::new(ids::CERTIFICATE, upstream)
    }

    fn fast_validation() -> ValidationConfig {
        ValidationConfig {
            max_wait_secs: 1,
            initial_poll_secs: 0,
            max_poll_secs: 0,
        }
    }

    #[tokio::test]
    async fn test_apply_writes_challenges_then_waits() {
        let provider = Arc::new(RecordingProvider::new());
        let authority = Arc::new(
            ScriptedAuthority::with_statuses(vec![
                CertificateStatus::Pending,
                CertificateStatus::Issued {
                    certificate_id: "cert-1".to_string(),
                },
            ])
            .with_challenges(vec![ValidationChallenge {
                record_name: "_acme.example.com".to_string(),
                record_type: "CNAME".to_string(),
                record_value: "validate.ca.test".to_string(),
            }]),
        );
        let stage = CertificateProvisioner::new(
            provider.clone(),
            authority,
            "example.com",
            fast_validation(),
        );

        let handle = stage.apply(&ctx_with_zone()).await.expect("apply");

        assert_eq!(handle.output_str("certificate_id"), Some("cert-1"));
        assert_eq!(handle.output_str_list("validation_record_ids").len(), 1);
        let spec = provider.last_create_spec(ResourceKind::DnsRecord).expect("record");
        assert_eq!(spec["zone_id"], json!("zone-1"));
        assert_eq!(spec["type"], json!("CNAME"));
    }

    #[tokio::test]
    async fn test_validation_failure_propagates() {
        let provider = Arc::new(RecordingProvider::new());
        let authority = Arc::new(ScriptedAuthority::with_statuses(vec![
            CertificateStatus::Failed {
                reason: "challenge record not found".to_string(),
            },
        ]));
        let stage = CertificateProvisioner::new(
            provider,
            authority,
            "example.com",
            fast_validation(),
        );

        let err = stage.apply(&ctx_with_zone()).await.expect_err("failed");
        assert!(matches!(err, ConvergeError::ValidationFailed { .. }));
    }

    #[tokio::test]
    async fn test_destroy_removes_challenges_and_certificate() {
        let provider = Arc::new(RecordingProvider::new());
        let authority = Arc::new(ScriptedAuthority::with_statuses(vec![
            CertificateStatus::Issued {
                certificate_id: "cert-1".to_string(),
            },
        ]));
        let stage = CertificateProvisioner::new(
            provider.clone(),
            authority,
            "example.com",
            fast_validation(),
        );

        let handle = stage.apply(&ctx_with_zone()).await.expect("apply");
        stage.destroy(&handle).await.expect("destroy");

        let deleted = provider.deleted_kinds();
        assert!(deleted.contains(&ResourceKind::Certificate));
    }
}
