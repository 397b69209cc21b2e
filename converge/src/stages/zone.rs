//! Zone provisioner: the DNS hosted zone.

use super::{ids, Stage, StageContext};
use crate::errors::ConvergeError;
use crate::handle::ResourceHandle;
use crate::provider::{CloudProvider, ResourceKind};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Creates the hosted zone for the apex domain. The zone's authoritative
/// nameservers are provider-assigned and flow downstream through the handle:
/// the delegation stage pushes them to the registrar, and the certificate
/// stage writes its challenges into the zone.
pub struct ZoneProvisioner {
    provider: Arc<dyn CloudProvider>,
    domain: String,
}

impl ZoneProvisioner {
    /// Creates the stage.
    #[must_use]
    pub fn new(provider: Arc<dyn CloudProvider>, domain: impl Into<String>) -> Self {
        Self {
            provider,
            domain: domain.into(),
        }
    }
}

#[async_trait]
impl Stage for ZoneProvisioner {
    fn id(&self) -> &str {
        ids::ZONE
    }

    fn inputs(&self) -> serde_json::Value {
        json!({ "domain": self.domain })
    }

    async fn apply(&self, _ctx: &StageContext) -> Result<ResourceHandle, ConvergeError> {
        let zone = self
            .provider
            .create(
                ResourceKind::HostedZone,
                &json!({ "domain": self.domain }),
            )
            .await?;

        let nameservers = zone.attr_str_list("nameservers");
        if nameservers.is_empty() {
            return Err(ConvergeError::Provider(crate::errors::ProviderError::Decode(
                format!("hosted zone '{}' came back without nameservers", zone.id),
            )));
        }

        Ok(ResourceHandle::new(zone.id.clone())
            .with_output("zone_id", json!(zone.id))
            .with_output("domain", json!(self.domain))
            .with_output("nameservers", json!(nameservers)))
    }

    async fn destroy(&self, handle: &ResourceHandle) -> Result<(), ConvergeError> {
        self.provider
            .delete(ResourceKind::HostedZone, &handle.id)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingProvider;

    #[tokio::test]
    async fn test_zone_handle_carries_nameservers() {
        let provider = Arc::new(RecordingProvider::new());
        let stage = ZoneProvisioner::new(provider, "example.com");

        let handle = stage.apply(&StageContext::default()).await.expect("apply");

        assert_eq!(handle.output_str("domain"), Some("example.com"));
        assert!(!handle.output_str_list("nameservers").is_empty());
    }

    #[tokio::test]
    async fn test_zone_without_nameservers_is_an_error() {
        let provider = Arc::new(RecordingProvider::new().without_zone_nameservers());
        let stage = ZoneProvisioner::new(provider, "example.com");

        let err = stage
            .apply(&StageContext::default())
            .await
            .expect_err("should fail");
        assert!(matches!(err, ConvergeError::Provider(_)));
    }
}
