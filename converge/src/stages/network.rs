//! Network provisioner: VPC, subnets, gateways, routing.

use super::{ids, Stage, StageContext};
use crate::config::NetworkConfig;
use crate::errors::ConvergeError;
use crate::handle::ResourceHandle;
use crate::provider::{CloudProvider, ResourceKind};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Declares the VPC, its subnets, internet and NAT gateways, and route
/// tables. The pipeline's root stage: everything else lands inside this VPC.
pub struct NetworkProvisioner {
    provider: Arc<dyn CloudProvider>,
    project: String,
    region: String,
    config: NetworkConfig,
}

impl NetworkProvisioner {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        project: impl Into<String>,
        region: impl Into<String>,
        config: NetworkConfig,
    ) -> Self {
        Self {
            provider,
            project: project.into(),
            region: region.into(),
            config,
        }
    }
}

#[async_trait]
impl Stage for NetworkProvisioner {
    fn id(&self) -> &str {
        ids::NETWORK
    }

    fn inputs(&self) -> serde_json::Value {
        json!({
            "project": self.project,
            "region": self.region,
            "vpc_cidr": self.config.vpc_cidr,
            "public_subnet_cidrs": self.config.public_subnet_cidrs,
            "private_subnet_cidrs": self.config.private_subnet_cidrs,
            "enable_nat": self.config.enable_nat,
        })
    }

    async fn apply(&self, _ctx: &StageContext) -> Result<ResourceHandle, ConvergeError> {
        let vpc = self
            .provider
            .create(
                ResourceKind::Vpc,
                &json!({
                    "name": format!("{}-vpc", self.project),
                    "region": self.region,
                    "cidr_block": self.config.vpc_cidr,
                }),
            )
            .await?;
        let vpc_id = vpc.id;

        let mut public_subnet_ids = Vec::new();
        for (index, cidr) in self.config.public_subnet_cidrs.iter().enumerate() {
            let subnet = self
                .provider
                .create(
                    ResourceKind::Subnet,
                    &json!({
                        "name": format!("{}-public-{index}", self.project),
                        "vpc_id": &vpc_id,
                        "cidr_block": cidr,
                        "public": true,
                    }),
                )
                .await?;
            public_subnet_ids.push(subnet.id);
        }

        let mut private_subnet_ids = Vec::new();
        for (index, cidr) in self.config.private_subnet_cidrs.iter().enumerate() {
            let subnet = self
                .provider
                .create(
                    ResourceKind::Subnet,
                    &json!({
                        "name": format!("{}-private-{index}", self.project),
                        "vpc_id": &vpc_id,
                        "cidr_block": cidr,
                        "public": false,
                    }),
                )
                .await?;
            private_subnet_ids.push(subnet.id);
        }

        let igw = self
            .provider
            .create(
                ResourceKind::InternetGateway,
                &json!({ "vpc_id": &vpc_id }),
            )
            .await?;
        let igw_id = igw.id;

        // NAT only makes sense when there are private subnets to route out.
        let mut nat_gateway_id = None;
        if self.config.enable_nat && !private_subnet_ids.is_empty() {
            let nat = self
                .provider
                .create(
                    ResourceKind::NatGateway,
                    &json!({
                        "vpc_id": &vpc_id,
                        "subnet_id": public_subnet_ids.first(),
                    }),
                )
                .await?;
            nat_gateway_id = Some(nat.id);
        }

        let public_rt = self
            .provider
            .create(
                ResourceKind::RouteTable,
                &json!({
                    "vpc_id": &vpc_id,
                    "subnet_ids": &public_subnet_ids,
                    "default_route": { "gateway_id": &igw_id },
                }),
            )
            .await?;
        let mut route_table_ids = vec![public_rt.id];

        if let Some(nat_id) = &nat_gateway_id {
            let private_rt = self
                .provider
                .create(
                    ResourceKind::RouteTable,
                    &json!({
                        "vpc_id": &vpc_id,
                        "subnet_ids": &private_subnet_ids,
                        "default_route": { "nat_gateway_id": nat_id },
                    }),
                )
                .await?;
            route_table_ids.push(private_rt.id);
        }

        let mut handle = ResourceHandle::new(vpc_id.clone())
            .with_output("vpc_id", json!(vpc_id))
            .with_output("public_subnet_ids", json!(public_subnet_ids))
            .with_output("private_subnet_ids", json!(private_subnet_ids))
            .with_output("internet_gateway_id", json!(igw_id))
            .with_output("route_table_ids", json!(route_table_ids));
        if let Some(nat_id) = nat_gateway_id {
            handle = handle.with_output("nat_gateway_id", json!(nat_id));
        }
        Ok(handle)
    }

    async fn destroy(&self, handle: &ResourceHandle) -> Result<(), ConvergeError> {
        for id in handle.output_str_list("route_table_ids") {
            self.provider.delete(ResourceKind::RouteTable, &id).await?;
        }
        if let Some(nat_id) = handle.output_str("nat_gateway_id") {
            self.provider.delete(ResourceKind::NatGateway, nat_id).await?;
        }
        if let Some(igw_id) = handle.output_str("internet_gateway_id") {
            self.provider
                .delete(ResourceKind::InternetGateway, igw_id)
                .await?;
        }
        for id in handle
            .output_str_list("public_subnet_ids")
            .into_iter()
            .chain(handle.output_str_list("private_subnet_ids"))
        {
            self.provider.delete(ResourceKind::Subnet, &id).await?;
        }
        self.provider.delete(ResourceKind::Vpc, &handle.id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingProvider;

    fn config() -> NetworkConfig {
        NetworkConfig {
            vpc_cidr: "10.0.0.0/16".to_string(),
            public_subnet_cidrs: vec!["10.0.1.0/24".to_string(), "10.0.2.0/24".to_string()],
            private_subnet_cidrs: vec!["10.0.101.0/24".to_string()],
            enable_nat: true,
        }
    }

    #[tokio::test]
    async fn test_apply_builds_full_network() {
        let provider = Arc::new(RecordingProvider::new());
        let stage = NetworkProvisioner::new(provider.clone(), "webstack", "eu-west-1", config());

        let ctx = StageContext::default();
        let handle = stage.apply(&ctx).await.expect("apply");

        assert_eq!(handle.output_str_list("public_subnet_ids").len(), 2);
        assert_eq!(handle.output_str_list("private_subnet_ids").len(), 1);
        assert!(handle.output_str("nat_gateway_id").is_some());
        assert_eq!(handle.output_str_list("route_table_ids").len(), 2);

        assert_eq!(provider.created_count(ResourceKind::Vpc), 1);
        assert_eq!(provider.created_count(ResourceKind::Subnet), 3);
        assert_eq!(provider.created_count(ResourceKind::RouteTable), 2);
    }

    #[tokio::test]
    async fn test_nat_skipped_without_private_subnets() {
        let provider = Arc::new(RecordingProvider::new());
        let mut cfg = config();
        cfg.private_subnet_cidrs.clear();
        let stage = NetworkProvisioner::new(provider.clone(), "webstack", "eu-west-1", cfg);

        let handle = stage.apply(&StageContext::default()).await.expect("apply");

        assert!(handle.output_str("nat_gateway_id").is_none());
        assert_eq!(provider.created_count(ResourceKind::NatGateway), 0);
        assert_eq!(handle.output_str_list("route_table_ids").len(), 1);
    }

    #[tokio::test]
    async fn test_destroy_removes_everything_vpc_last() {
        let provider = Arc::new(RecordingProvider::new());
        let stage = NetworkProvisioner::new(provider.clone(), "webstack", "eu-west-1", config());

        let handle = stage.apply(&StageContext::default()).await.expect("apply");
        stage.destroy(&handle).await.expect("destroy");

        let deleted = provider.deleted_kinds();
        assert_eq!(deleted.last(), Some(&ResourceKind::Vpc));
        assert_eq!(
            provider.created_total(),
            deleted.len(),
            "every created resource is deleted"
        );
    }
}
