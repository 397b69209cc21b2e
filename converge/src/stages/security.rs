//! Security provisioner: the edge security group.

use super::{ids, Stage, StageContext};
use crate::config::SecurityConfig;
use crate::errors::ConvergeError;
use crate::handle::ResourceHandle;
use crate::provider::{CloudProvider, ResourceKind};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Declares the security group scoped to the VPC: web ingress for the world,
/// SSH only when a CIDR is configured for it, all egress open.
pub struct SecurityProvisioner {
    provider: Arc<dyn CloudProvider>,
    project: String,
    config: SecurityConfig,
}

impl SecurityProvisioner {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        project: impl Into<String>,
        config: SecurityConfig,
    ) -> Self {
        Self {
            provider,
            project: project.into(),
            config,
        }
    }

    fn ingress_rules(&self) -> Vec<serde_json::Value> {
        let mut rules: Vec<serde_json::Value> = self
            .config
            .ingress_ports
            .iter()
            .map(|port| {
                json!({
                    "protocol": "tcp",
                    "port": port,
                    "cidr": "0.0.0.0/0",
                })
            })
            .collect();
        if let Some(ssh_cidr) = &self.config.ssh_cidr {
            rules.push(json!({
                "protocol": "tcp",
                "port": 22,
                "cidr": ssh_cidr,
            }));
        }
        rules
    }
}

#[async_trait]
impl Stage for SecurityProvisioner {
    fn id(&self) -> &str {
        ids::SECURITY
    }

    fn inputs(&self) -> serde_json::Value {
        json!({
            "project": self.project,
            "ingress_ports": self.config.ingress_ports,
            "ssh_cidr": self.config.ssh_cidr,
        })
    }

    async fn apply(&self, ctx: &StageContext) -> Result<ResourceHandle, ConvergeError> {
        let network = ctx.upstream(ids::NETWORK)?;
        let vpc_id = network
            .output_str("vpc_id")
            .ok_or_else(|| ConvergeError::MissingUpstream {
                stage: self.id().to_string(),
                upstream: format!("{}.vpc_id", ids::NETWORK),
            })?;

        let group = self
            .provider
            .create(
                ResourceKind::SecurityGroup,
                &json!({
                    "name": format!("{}-edge", self.project),
                    "vpc_id": vpc_id,
                    "ingress": self.ingress_rules(),
                    "egress": [{ "protocol": "-1", "cidr": "0.0.0.0/0" }],
                }),
            )
            .await?;

        Ok(ResourceHandle::new(group.id.clone())
            .with_output("security_group_id", json!(group.id)))
    }

    async fn destroy(&self, handle: &ResourceHandle) -> Result<(), ConvergeError> {
        self.provider
            .delete(ResourceKind::SecurityGroup, &handle.id)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingProvider;
    use std::collections::HashMap;

    fn ctx_with_network() -> StageContext {
        let mut upstream = HashMap::new();
        upstream.insert(
            ids::NETWORK.to_string(),
            ResourceHandle::new("vpc-1").with_output("vpc_id", json!("vpc-1")),
        );
        StageContext::new(ids::SECURITY, upstream)
    }

    #[tokio::test]
    async fn test_group_scoped_to_upstream_vpc() {
        let provider = Arc::new(RecordingProvider::new());
        let stage = SecurityProvisioner::new(provider.clone(), "webstack", SecurityConfig::default());

        let handle = stage.apply(&ctx_with_network()).await.expect("apply");

        assert!(handle.output_str("security_group_id").is_some());
        let spec = provider.last_create_spec(ResourceKind::SecurityGroup).expect("spec");
        assert_eq!(spec["vpc_id"], json!("vpc-1"));
        // 80 and 443 by default, no SSH without a CIDR.
        assert_eq!(spec["ingress"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_ssh_rule_added_when_configured() {
        let provider = Arc::new(RecordingProvider::new());
        let config = SecurityConfig {
            ssh_cidr: Some("203.0.113.0/24".to_string()),
            ..SecurityConfig::default()
        };
        let stage = SecurityProvisioner::new(provider.clone(), "webstack", config);

        stage.apply(&ctx_with_network()).await.expect("apply");

        let spec = provider.last_create_spec(ResourceKind::SecurityGroup).expect("spec");
        let rules = spec["ingress"].as_array().expect("rules");
        assert_eq!(rules.len(), 3);
        assert!(rules.iter().any(|r| r["port"] == json!(22)));
    }

    #[tokio::test]
    async fn test_apply_without_network_fails() {
        let provider = Arc::new(RecordingProvider::new());
        let stage = SecurityProvisioner::new(provider, "webstack", SecurityConfig::default());

        let err = stage
            .apply(&StageContext::default())
            .await
            .expect_err("missing upstream");
        assert!(matches!(err, ConvergeError::MissingUpstream { .. }));
    }
}
