//! Cloud provider boundary.
//!
//! The pipeline depends on exactly three properties of the resource-management
//! API: create returns an identifier, read returns current attributes or a
//! not-found signal, and delete is idempotent (not-found on delete is
//! success). `list` serves the inventory enumerator, which scans whole
//! collections rather than single resources.

use crate::errors::ProviderError;
use crate::retry::{retry_if, RetryPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The resource kinds the provisioner stages and inventory scanners touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Virtual private cloud.
    Vpc,
    /// Subnet within a VPC.
    Subnet,
    /// Internet gateway.
    InternetGateway,
    /// NAT gateway.
    NatGateway,
    /// Route table.
    RouteTable,
    /// Security group.
    SecurityGroup,
    /// DNS hosted zone.
    HostedZone,
    /// DNS record within a zone.
    DnsRecord,
    /// TLS certificate.
    Certificate,
    /// Load balancer.
    LoadBalancer,
    /// Compute instance.
    Instance,
    /// Managed relational database instance.
    DbInstance,
    /// Serverless function.
    Function,
    /// Key-value table.
    Table,
    /// Object storage bucket.
    Bucket,
}

impl ResourceKind {
    /// The collection segment used in API paths and report keys.
    #[must_use]
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Vpc => "vpcs",
            Self::Subnet => "subnets",
            Self::InternetGateway => "internet-gateways",
            Self::NatGateway => "nat-gateways",
            Self::RouteTable => "route-tables",
            Self::SecurityGroup => "security-groups",
            Self::HostedZone => "hosted-zones",
            Self::DnsRecord => "dns-records",
            Self::Certificate => "certificates",
            Self::LoadBalancer => "load-balancers",
            Self::Instance => "instances",
            Self::DbInstance => "db-instances",
            Self::Function => "functions",
            Self::Table => "tables",
            Self::Bucket => "buckets",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.collection())
    }
}

/// The provider's answer to a create call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedResource {
    /// The new resource's identifier.
    pub id: String,
    /// Provider-assigned attributes (nameservers of a new zone, DNS name of
    /// a new load balancer).
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl CreatedResource {
    /// Looks up a string attribute.
    #[must_use]
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(serde_json::Value::as_str)
    }

    /// Looks up a list-of-strings attribute.
    #[must_use]
    pub fn attr_str_list(&self, key: &str) -> Vec<String> {
        self.attributes
            .get(key)
            .and_then(serde_json::Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(ToString::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// The resource-management API the stages converge against.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Creates a resource from a declared spec, returning its identifier and
    /// provider-assigned attributes.
    async fn create(
        &self,
        kind: ResourceKind,
        spec: &serde_json::Value,
    ) -> Result<CreatedResource, ProviderError>;

    /// Reads a resource's current attributes; `None` means not found.
    async fn read(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> Result<Option<serde_json::Value>, ProviderError>;

    /// Deletes a resource. Not-found is success.
    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), ProviderError>;

    /// Lists a collection within a region. Serves the inventory scanners.
    async fn list(
        &self,
        kind: ResourceKind,
        region: &str,
    ) -> Result<Vec<serde_json::Value>, ProviderError>;
}

/// HTTP implementation of [`CloudProvider`].
///
/// Transient failures (transport, 429, 5xx) are retried here with bounded
/// backoff; other statuses propagate as [`ProviderError::Api`].
pub struct RestCloudProvider {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl RestCloudProvider {
    /// Creates a provider client against the given endpoint.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        })
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, kind: ResourceKind, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/v1/{}/{}", self.base_url, kind.collection(), id),
            None => format!("{}/v1/{}", self.base_url, kind.collection()),
        }
    }

    async fn dispatch(
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ProviderError> {
        request
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))
    }

    async fn error_for(response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        ProviderError::Api { status, message }
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

#[async_trait]
impl CloudProvider for RestCloudProvider {
    async fn create(
        &self,
        kind: ResourceKind,
        spec: &serde_json::Value,
    ) -> Result<CreatedResource, ProviderError> {
        let url = self.url(kind, None);
        let created: CreatedResource = retry_if(
            &self.retry,
            kind.collection(),
            || {
                let request = self.http.post(&url).json(spec);
                async move { Self::decode(Self::dispatch(request).await?).await }
            },
            ProviderError::is_transient,
        )
        .await?;
        tracing::info!(kind = %kind, id = %created.id, "created resource");
        Ok(created)
    }

    async fn read(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> Result<Option<serde_json::Value>, ProviderError> {
        let url = self.url(kind, Some(id));
        retry_if(
            &self.retry,
            kind.collection(),
            || {
                let request = self.http.get(&url);
                async move {
                    let response = Self::dispatch(request).await?;
                    if response.status() == reqwest::StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    Ok(Some(Self::decode(response).await?))
                }
            },
            ProviderError::is_transient,
        )
        .await
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), ProviderError> {
        let url = self.url(kind, Some(id));
        retry_if(
            &self.retry,
            kind.collection(),
            || {
                let request = self.http.delete(&url);
                async move {
                    let response = Self::dispatch(request).await?;
                    // Not-found on delete is success.
                    if response.status() == reqwest::StatusCode::NOT_FOUND
                        || response.status().is_success()
                    {
                        return Ok(());
                    }
                    Err(Self::error_for(response).await)
                }
            },
            ProviderError::is_transient,
        )
        .await?;
        tracing::info!(kind = %kind, id, "deleted resource");
        Ok(())
    }

    async fn list(
        &self,
        kind: ResourceKind,
        region: &str,
    ) -> Result<Vec<serde_json::Value>, ProviderError> {
        let url = self.url(kind, None);
        retry_if(
            &self.retry,
            kind.collection(),
            || {
                let request = self.http.get(&url).query(&[("region", region)]);
                async move { Self::decode(Self::dispatch(request).await?).await }
            },
            ProviderError::is_transient,
        )
        .await
    }
}

#[async_trait]
impl crate::cert::CertificateAuthority for RestCloudProvider {
    async fn request_certificate(
        &self,
        domain: &str,
    ) -> Result<crate::cert::CertificateRequest, ProviderError> {
        let url = format!("{}/v1/certificate-requests", self.base_url);
        let request: crate::cert::CertificateRequest = retry_if(
            &self.retry,
            "certificate-requests",
            || {
                let request = self
                    .http
                    .post(&url)
                    .json(&serde_json::json!({ "domain": domain }));
                async move { Self::decode(Self::dispatch(request).await?).await }
            },
            ProviderError::is_transient,
        )
        .await?;
        tracing::info!(domain, request_id = %request.request_id, "certificate requested");
        Ok(request)
    }

    async fn status(
        &self,
        request_id: &str,
    ) -> Result<crate::cert::CertificateStatus, ProviderError> {
        let url = format!("{}/v1/certificate-requests/{request_id}", self.base_url);
        // No retry here: the validation waiter owns the polling cadence.
        let response = Self::dispatch(self.http.get(&url)).await?;
        Self::decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collection_segments() {
        assert_eq!(ResourceKind::Vpc.collection(), "vpcs");
        assert_eq!(ResourceKind::HostedZone.collection(), "hosted-zones");
        assert_eq!(ResourceKind::LoadBalancer.collection(), "load-balancers");
    }

    #[test]
    fn test_created_resource_attrs() {
        let created: CreatedResource = serde_json::from_value(json!({
            "id": "zone-1",
            "attributes": {
                "nameservers": ["ns-1.dns.test", "ns-2.dns.test"],
                "domain": "example.com"
            }
        }))
        .expect("parse");

        assert_eq!(created.attr_str("domain"), Some("example.com"));
        assert_eq!(
            created.attr_str_list("nameservers"),
            vec!["ns-1.dns.test".to_string(), "ns-2.dns.test".to_string()]
        );
    }

    #[test]
    fn test_created_resource_without_attributes() {
        let created: CreatedResource =
            serde_json::from_value(json!({"id": "sg-1"})).expect("parse");
        assert!(created.attributes.is_empty());
        assert!(created.attr_str("anything").is_none());
    }

    #[test]
    fn test_url_shapes() {
        let provider = RestCloudProvider::new("https://cloud.internal/").expect("client");
        assert_eq!(
            provider.url(ResourceKind::Vpc, None),
            "https://cloud.internal/v1/vpcs"
        );
        assert_eq!(
            provider.url(ResourceKind::DnsRecord, Some("rec-9")),
            "https://cloud.internal/v1/dns-records/rec-9"
        );
    }
}
