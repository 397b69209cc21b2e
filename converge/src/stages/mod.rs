//! Stage trait and the provisioner stages.
//!
//! A stage is one unit of convergence work: it declares the configuration
//! slice that feeds its fingerprint, applies against external APIs to
//! produce a [`ResourceHandle`], and can tear down what that handle records.

mod certificate;
mod delegation;
mod edge;
mod network;
mod security;
mod zone;

pub use certificate::CertificateProvisioner;
pub use delegation::DelegationProvisioner;
pub use edge::EdgeProvisioner;
pub use network::NetworkProvisioner;
pub use security::SecurityProvisioner;
pub use zone::ZoneProvisioner;

use crate::errors::ConvergeError;
use crate::handle::ResourceHandle;
use async_trait::async_trait;
use std::collections::HashMap;

/// Canonical stage ids used by the deployment pipeline.
pub mod ids {
    /// VPC, subnets, gateways, routing.
    pub const NETWORK: &str = "network";
    /// Security group.
    pub const SECURITY: &str = "security";
    /// DNS hosted zone.
    pub const ZONE: &str = "zone";
    /// Registrar nameserver delegation.
    pub const DELEGATION: &str = "delegation";
    /// TLS certificate request and validation.
    pub const CERTIFICATE: &str = "certificate";
    /// Load balancer, compute, final DNS record.
    pub const EDGE: &str = "edge";
}

/// Upstream handles visible to an executing stage.
///
/// Handles are produced exclusively by their origin stage and read-only
/// here; the sequencer snapshots the map before each stage runs.
#[derive(Debug, Clone, Default)]
pub struct StageContext {
    stage: String,
    upstream: HashMap<String, ResourceHandle>,
}

impl StageContext {
    /// Creates a context for the named stage over the handles produced (or
    /// cached) so far.
    #[must_use]
    pub fn new(stage: impl Into<String>, upstream: HashMap<String, ResourceHandle>) -> Self {
        Self {
            stage: stage.into(),
            upstream,
        }
    }

    /// The executing stage's id.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// The handle a named upstream stage produced.
    ///
    /// # Errors
    ///
    /// [`ConvergeError::MissingUpstream`] when the producer has not run —
    /// a wiring defect, since the sequencer orders dependencies first.
    pub fn upstream(&self, stage_id: &str) -> Result<&ResourceHandle, ConvergeError> {
        self.upstream
            .get(stage_id)
            .ok_or_else(|| ConvergeError::MissingUpstream {
                stage: self.stage.clone(),
                upstream: stage_id.to_string(),
            })
    }
}

/// One unit of infrastructure convergence work.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable stage identifier.
    fn id(&self) -> &str;

    /// The declared inputs that feed this stage's fingerprint. Upstream
    /// runtime outputs are deliberately excluded so one stage's input change
    /// never cascades into another stage's fingerprint.
    fn inputs(&self) -> serde_json::Value;

    /// Produces or converges the stage's resources.
    async fn apply(&self, ctx: &StageContext) -> Result<ResourceHandle, ConvergeError>;

    /// Tears down what the handle records. Deletes are idempotent: a
    /// resource already gone counts as success.
    async fn destroy(&self, handle: &ResourceHandle) -> Result<(), ConvergeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_returns_known_upstream() {
        let mut upstream = HashMap::new();
        upstream.insert(
            ids::NETWORK.to_string(),
            ResourceHandle::new("vpc-1").with_output("vpc_id", json!("vpc-1")),
        );
        let ctx = StageContext::new(ids::SECURITY, upstream);

        let handle = ctx.upstream(ids::NETWORK).expect("handle");
        assert_eq!(handle.id, "vpc-1");
    }

    #[test]
    fn test_context_reports_missing_upstream() {
        let ctx = StageContext::new(ids::EDGE, HashMap::new());
        let err = ctx.upstream(ids::CERTIFICATE).expect_err("missing");
        assert!(matches!(err, ConvergeError::MissingUpstream { .. }));
    }
}
