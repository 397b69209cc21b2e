//! Delegation provisioner: registrar nameserver synchronization.
//!
//! Promoted to a first-class stage so the external side effect carries its
//! own fingerprint and skip semantics instead of firing on every apply.

use super::{ids, Stage, StageContext};
use crate::errors::ConvergeError;
use crate::handle::ResourceHandle;
use crate::registrar::{normalize, DelegationClient, SyncOutcome};
use async_trait::async_trait;
use serde_json::json;

/// Pushes the zone's authoritative nameservers to the domain's registrar.
///
/// The sync itself is idempotent by value — the client reads before writing
/// and never re-issues an update the registrar already serves.
pub struct DelegationProvisioner {
    client: DelegationClient,
    domain: String,
}

impl DelegationProvisioner {
    /// Creates the stage.
    #[must_use]
    pub fn new(client: DelegationClient, domain: impl Into<String>) -> Self {
        Self {
            client,
            domain: domain.into(),
        }
    }
}

#[async_trait]
impl Stage for DelegationProvisioner {
    fn id(&self) -> &str {
        ids::DELEGATION
    }

    fn inputs(&self) -> serde_json::Value {
        json!({ "domain": self.domain })
    }

    async fn apply(&self, ctx: &StageContext) -> Result<ResourceHandle, ConvergeError> {
        let zone = ctx.upstream(ids::ZONE)?;
        let nameservers = zone.output_str_list("nameservers");

        let outcome = self
            .client
            .sync_nameservers(&self.domain, &nameservers)
            .await?;
        tracing::info!(domain = %self.domain, ?outcome, "delegation converged");

        Ok(ResourceHandle::new(format!("delegation:{}", self.domain))
            .with_output("domain", json!(self.domain))
            .with_output("nameservers", json!(normalize(&nameservers)))
            .with_output(
                "updated",
                json!(matches!(outcome, SyncOutcome::Updated)),
            ))
    }

    async fn destroy(&self, _handle: &ResourceHandle) -> Result<(), ConvergeError> {
        // There is no meaningful "un-delegate"; tearing down the stack just
        // forgets the recorded handle.
        tracing::debug!(domain = %self.domain, "leaving registrar delegation in place");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRegistrar;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn ctx_with_zone(nameservers: &[&str]) -> StageContext {
        let mut upstream = HashMap::new();
        upstream.insert(
            ids::ZONE.to_string(),
            ResourceHandle::new("zone-1")
                .with_output("zone_id", json!("zone-1"))
                .with_output("nameservers", json!(nameservers)),
        );
        StageContext::new(ids::DELEGATION, upstream)
    }

    #[tokio::test]
    async fn test_apply_pushes_zone_nameservers() {
        let registrar = Arc::new(ScriptedRegistrar::serving(vec!["old.dns.test".to_string()]));
        let stage = DelegationProvisioner::new(
            DelegationClient::new(registrar.clone()),
            "example.com",
        );

        let handle = stage
            .apply(&ctx_with_zone(&["ns-1.dns.test", "ns-2.dns.test"]))
            .await
            .expect("apply");

        assert_eq!(registrar.replace_calls(), 1);
        assert_eq!(handle.output_str("domain"), Some("example.com"));
        assert_eq!(handle.outputs["updated"], json!(true));
    }

    #[tokio::test]
    async fn test_apply_without_zone_fails() {
        let registrar = Arc::new(ScriptedRegistrar::serving(Vec::new()));
        let stage =
            DelegationProvisioner::new(DelegationClient::new(registrar), "example.com");

        let err = stage
            .apply(&StageContext::default())
            .await
            .expect_err("missing zone");
        assert!(matches!(err, ConvergeError::MissingUpstream { .. }));
    }

    #[tokio::test]
    async fn test_destroy_is_a_noop() {
        let registrar = Arc::new(ScriptedRegistrar::serving(Vec::new()));
        let stage = DelegationProvisioner::new(
            DelegationClient::new(registrar.clone()),
            "example.com",
        );

        stage
            .destroy(&ResourceHandle::new("delegation:example.com"))
            .await
            .expect("destroy");
        assert_eq!(registrar.replace_calls(), 0);
    }
}
