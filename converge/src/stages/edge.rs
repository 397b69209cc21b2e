//! Edge provisioner: load balancer, compute, final DNS record.

use super::{ids, Stage, StageContext};
use crate::config::ComputeConfig;
use crate::errors::ConvergeError;
use crate::handle::ResourceHandle;
use crate::provider::{CloudProvider, ResourceKind};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Creates the public load balancer (bound to the certificate, security
/// group, and public subnets), attaches the compute instance behind it, and
/// writes the apex alias record last — the record is only ever created
/// against a load balancer that already exists.
pub struct EdgeProvisioner {
    provider: Arc<dyn CloudProvider>,
    project: String,
    domain: String,
    compute: ComputeConfig,
}

impl EdgeProvisioner {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        project: impl Into<String>,
        domain: impl Into<String>,
        compute: ComputeConfig,
    ) -> Self {
        Self {
            provider,
            project: project.into(),
            domain: domain.into(),
            compute,
        }
    }

    fn required_output(
        &self,
        handle: &ResourceHandle,
        upstream: &str,
        key: &str,
    ) -> Result<String, ConvergeError> {
        handle
            .output_str(key)
            .map(ToString::to_string)
            .ok_or_else(|| ConvergeError::MissingUpstream {
                stage: self.id().to_string(),
                upstream: format!("{upstream}.{key}"),
            })
    }
}

#[async_trait]
impl Stage for EdgeProvisioner {
    fn id(&self) -> &str {
        ids::EDGE
    }

    fn inputs(&self) -> serde_json::Value {
        json!({
            "project": self.project,
            "domain": self.domain,
            "ami_id": self.compute.ami_id,
            "instance_type": self.compute.instance_type,
        })
    }

    async fn apply(&self, ctx: &StageContext) -> Result<ResourceHandle, ConvergeError> {
        let network = ctx.upstream(ids::NETWORK)?;
        let security = ctx.upstream(ids::SECURITY)?;
        let certificate = ctx.upstream(ids::CERTIFICATE)?;
        let zone = ctx.upstream(ids::ZONE)?;

        let public_subnet_ids = network.output_str_list("public_subnet_ids");
        if public_subnet_ids.is_empty() {
            return Err(ConvergeError::MissingUpstream {
                stage: self.id().to_string(),
                upstream: format!("{}.public_subnet_ids", ids::NETWORK),
            });
        }
        let security_group_id =
            self.required_output(security, ids::SECURITY, "security_group_id")?;
        let certificate_id =
            self.required_output(certificate, ids::CERTIFICATE, "certificate_id")?;
        let zone_id = self.required_output(zone, ids::ZONE, "zone_id")?;

        let lb = self
            .provider
            .create(
                ResourceKind::LoadBalancer,
                &json!({
                    "name": format!("{}-edge", self.project),
                    "subnet_ids": public_subnet_ids,
                    "security_group_ids": [&security_group_id],
                    "listeners": [{
                        "port": 443,
                        "protocol": "HTTPS",
                        "certificate_id": certificate_id,
                    }, {
                        "port": 80,
                        "protocol": "HTTP",
                        "redirect_to": 443,
                    }],
                }),
            )
            .await?;
        let lb_dns_name = lb.attr_str("dns_name").map(ToString::to_string).ok_or_else(|| {
            ConvergeError::Provider(crate::errors::ProviderError::Decode(format!(
                "load balancer '{}' came back without a DNS name",
                lb.id
            )))
        })?;

        let instance = self
            .provider
            .create(
                ResourceKind::Instance,
                &json!({
                    "name": format!("{}-app", self.project),
                    "ami_id": self.compute.ami_id,
                    "instance_type": self.compute.instance_type,
                    "subnet_id": network
                        .output_str_list("private_subnet_ids")
                        .first()
                        .unwrap_or(&public_subnet_ids[0]),
                    "security_group_ids": [&security_group_id],
                    "load_balancer_id": &lb.id,
                }),
            )
            .await?;

        // Final record last: it points at a live load balancer.
        let record = self
            .provider
            .create(
                ResourceKind::DnsRecord,
                &json!({
                    "zone_id": zone_id,
                    "name": self.domain,
                    "type": "ALIAS",
                    "value": &lb_dns_name,
                }),
            )
            .await?;

        Ok(ResourceHandle::new(lb.id.clone())
            .with_output("load_balancer_id", json!(lb.id))
            .with_output("load_balancer_dns_name", json!(lb_dns_name))
            .with_output("instance_id", json!(instance.id))
            .with_output("record_id", json!(record.id)))
    }

    async fn destroy(&self, handle: &ResourceHandle) -> Result<(), ConvergeError> {
        if let Some(record_id) = handle.output_str("record_id") {
            self.provider.delete(ResourceKind::DnsRecord, record_id).await?;
        }
        if let Some(instance_id) = handle.output_str("instance_id") {
            self.provider.delete(ResourceKind::Instance, instance_id).await?;
        }
        self.provider
            .delete(ResourceKind::LoadBalancer, &handle.id)
            .await?;
        Ok(())
    }
}
