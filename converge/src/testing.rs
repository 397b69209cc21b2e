//! Recording test doubles for the external boundaries.
//!
//! These make the pipeline's contracts directly assertable: how many
//! provider calls a run made, whether the registrar was written at all, and
//! which statuses the certificate authority served.

use crate::cert::{CertificateAuthority, CertificateRequest, CertificateStatus, ValidationChallenge};
use crate::errors::{ConvergeError, ProviderError, RegistrarError};
use crate::handle::ResourceHandle;
use crate::inventory::{ResourceRecord, ServiceScanner};
use crate::provider::{CloudProvider, CreatedResource, ResourceKind};
use crate::registrar::Registrar;
use crate::stages::{Stage, StageContext};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One recorded provider call.
#[derive(Debug, Clone)]
pub struct ProviderCall {
    /// The operation: create, read, delete, or list.
    pub op: &'static str,
    /// The resource kind.
    pub kind: ResourceKind,
    /// The spec passed to create, when applicable.
    pub spec: Option<serde_json::Value>,
    /// The id passed to read/delete, when applicable.
    pub id: Option<String>,
}

/// A [`CloudProvider`] that fabricates ids, records every call, and can be
/// scripted to fail.
#[derive(Default)]
pub struct RecordingProvider {
    calls: Mutex<Vec<ProviderCall>>,
    next_id: AtomicUsize,
    zone_without_nameservers: bool,
    fail_create: Mutex<Option<ResourceKind>>,
    listings: Mutex<HashMap<ResourceKind, Vec<serde_json::Value>>>,
}

impl RecordingProvider {
    /// Creates a provider that succeeds at everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes hosted zone creation omit nameserver attributes.
    #[must_use]
    pub fn without_zone_nameservers(mut self) -> Self {
        self.zone_without_nameservers = true;
        self
    }

    /// Makes every create of `kind` fail with a 500.
    pub fn fail_create_of(&self, kind: ResourceKind) {
        *self.fail_create.lock() = Some(kind);
    }

    /// Scripts the listing returned for a kind.
    pub fn set_listing(&self, kind: ResourceKind, items: Vec<serde_json::Value>) {
        self.listings.lock().insert(kind, items);
    }

    /// Every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().clone()
    }

    /// Total number of calls of any kind.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of successful-or-not create calls for a kind.
    #[must_use]
    pub fn created_count(&self, kind: ResourceKind) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.op == "create" && call.kind == kind)
            .count()
    }

    /// Total create calls.
    #[must_use]
    pub fn created_total(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.op == "create")
            .count()
    }

    /// Kinds created, in call order.
    #[must_use]
    pub fn created_kinds(&self) -> Vec<ResourceKind> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.op == "create")
            .map(|call| call.kind)
            .collect()
    }

    /// Kinds deleted, in call order.
    #[must_use]
    pub fn deleted_kinds(&self) -> Vec<ResourceKind> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.op == "delete")
            .map(|call| call.kind)
            .collect()
    }

    /// The spec of the most recent create of a kind.
    #[must_use]
    pub fn last_create_spec(&self, kind: ResourceKind) -> Option<serde_json::Value> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|call| call.op == "create" && call.kind == kind)
            .and_then(|call| call.spec.clone())
    }

    fn record(&self, call: ProviderCall) {
        self.calls.lock().push(call);
    }

    fn mint_id(&self, kind: ResourceKind) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let prefix = match kind {
            ResourceKind::Vpc => "vpc",
            ResourceKind::Subnet => "subnet",
            ResourceKind::InternetGateway => "igw",
            ResourceKind::NatGateway => "nat",
            ResourceKind::RouteTable => "rtb",
            ResourceKind::SecurityGroup => "sg",
            ResourceKind::HostedZone => "zone",
            ResourceKind::DnsRecord => "rec",
            ResourceKind::Certificate => "cert",
            ResourceKind::LoadBalancer => "lb",
            ResourceKind::Instance => "i",
            ResourceKind::DbInstance => "db",
            ResourceKind::Function => "fn",
            ResourceKind::Table => "tbl",
            ResourceKind::Bucket => "bkt",
        };
        format!("{prefix}-{n}")
    }
}

#[async_trait]
impl CloudProvider for RecordingProvider {
    async fn create(
        &self,
        kind: ResourceKind,
        spec: &serde_json::Value,
    ) -> Result<CreatedResource, ProviderError> {
        self.record(ProviderCall {
            op: "create",
            kind,
            spec: Some(spec.clone()),
            id: None,
        });
        if *self.fail_create.lock() == Some(kind) {
            return Err(ProviderError::Api {
                status: 500,
                message: format!("scripted failure creating {kind}"),
            });
        }
        let id = self.mint_id(kind);
        let mut attributes = serde_json::Map::new();
        match kind {
            ResourceKind::HostedZone if !self.zone_without_nameservers => {
                attributes.insert(
                    "nameservers".to_string(),
                    json!(["ns-1.dns.test", "ns-2.dns.test"]),
                );
            }
            ResourceKind::LoadBalancer => {
                attributes.insert("dns_name".to_string(), json!(format!("{id}.elb.test")));
            }
            _ => {}
        }
        Ok(CreatedResource { id, attributes })
    }

    async fn read(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> Result<Option<serde_json::Value>, ProviderError> {
        self.record(ProviderCall {
            op: "read",
            kind,
            spec: None,
            id: Some(id.to_string()),
        });
        Ok(Some(json!({ "id": id })))
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), ProviderError> {
        self.record(ProviderCall {
            op: "delete",
            kind,
            spec: None,
            id: Some(id.to_string()),
        });
        Ok(())
    }

    async fn list(
        &self,
        kind: ResourceKind,
        _region: &str,
    ) -> Result<Vec<serde_json::Value>, ProviderError> {
        self.record(ProviderCall {
            op: "list",
            kind,
            spec: None,
            id: None,
        });
        Ok(self.listings.lock().get(&kind).cloned().unwrap_or_default())
    }
}

/// A [`Registrar`] serving a mutable nameserver set, with scripted
/// rejections and transient failures.
#[derive(Default)]
pub struct ScriptedRegistrar {
    current: Mutex<Vec<String>>,
    read_calls: AtomicUsize,
    replace_calls: AtomicUsize,
    reject_reason: Mutex<Option<String>>,
    transient_remaining: AtomicUsize,
    hang: bool,
}

impl ScriptedRegistrar {
    /// Creates a registrar currently serving the given set.
    #[must_use]
    pub fn serving(nameservers: Vec<String>) -> Self {
        Self {
            current: Mutex::new(nameservers),
            ..Self::default()
        }
    }

    /// Creates a registrar whose calls never return.
    #[must_use]
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    /// Makes every call fail with a rejection.
    #[must_use]
    pub fn rejecting(self, reason: impl Into<String>) -> Self {
        *self.reject_reason.lock() = Some(reason.into());
        self
    }

    /// Makes the next `n` calls fail transiently.
    #[must_use]
    pub fn failing_transiently(self, n: usize) -> Self {
        self.transient_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Read call count.
    #[must_use]
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Replace call count.
    #[must_use]
    pub fn replace_calls(&self) -> usize {
        self.replace_calls.load(Ordering::SeqCst)
    }

    fn scripted_failure(&self, domain: &str) -> Option<RegistrarError> {
        if self
            .transient_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Some(RegistrarError::Transient("connection reset".to_string()));
        }
        self.reject_reason
            .lock()
            .as_ref()
            .map(|reason| RegistrarError::Rejected {
                domain: domain.to_string(),
                reason: reason.clone(),
            })
    }
}

impl ScriptedRegistrar {
    async fn hang_forever(&self) {
        while self.hang {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }
    }
}

#[async_trait]
impl Registrar for ScriptedRegistrar {
    async fn current_nameservers(&self, domain: &str) -> Result<Vec<String>, RegistrarError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.hang_forever().await;
        if let Some(err) = self.scripted_failure(domain) {
            return Err(err);
        }
        Ok(self.current.lock().clone())
    }

    async fn replace_nameservers(
        &self,
        domain: &str,
        nameservers: &[String],
    ) -> Result<(), RegistrarError> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        self.hang_forever().await;
        if let Some(err) = self.scripted_failure(domain) {
            return Err(err);
        }
        *self.current.lock() = nameservers.to_vec();
        Ok(())
    }
}

/// A [`CertificateAuthority`] serving a scripted status sequence; the last
/// status repeats once the script is exhausted.
#[derive(Default)]
pub struct ScriptedAuthority {
    statuses: Mutex<VecDeque<CertificateStatus>>,
    last: Mutex<Option<CertificateStatus>>,
    challenges: Vec<ValidationChallenge>,
    status_calls: AtomicUsize,
    transient_remaining: AtomicUsize,
    hang: bool,
}

impl ScriptedAuthority {
    /// Creates an authority serving the given statuses in order.
    #[must_use]
    pub fn with_statuses(statuses: Vec<CertificateStatus>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            ..Self::default()
        }
    }

    /// Creates an authority whose status calls never return.
    #[must_use]
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    /// Attaches validation challenges to certificate requests.
    #[must_use]
    pub fn with_challenges(mut self, challenges: Vec<ValidationChallenge>) -> Self {
        self.challenges = challenges;
        self
    }

    /// Makes the next `n` status calls fail transiently.
    #[must_use]
    pub fn failing_transiently(self, n: usize) -> Self {
        self.transient_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Status call count.
    #[must_use]
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateAuthority for ScriptedAuthority {
    async fn request_certificate(
        &self,
        domain: &str,
    ) -> Result<CertificateRequest, ProviderError> {
        Ok(CertificateRequest {
            request_id: format!("req-{domain}"),
            challenges: self.challenges.clone(),
        })
    }

    async fn status(&self, _request_id: &str) -> Result<CertificateStatus, ProviderError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            }
        }
        if self
            .transient_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::Transport("connection reset".to_string()));
        }
        let next = self.statuses.lock().pop_front();
        if let Some(status) = next {
            *self.last.lock() = Some(status.clone());
            return Ok(status);
        }
        Ok(self
            .last
            .lock()
            .clone()
            .unwrap_or(CertificateStatus::Pending))
    }
}

/// A stage that succeeds immediately and counts its calls. `Clone` shares
/// the counters, so tests can keep a handle on a stage they hand to the
/// sequencer.
#[derive(Debug, Clone)]
pub struct StaticStage {
    id: String,
    inputs: serde_json::Value,
    apply_calls: Arc<AtomicUsize>,
    destroy_calls: Arc<AtomicUsize>,
}

impl StaticStage {
    /// Creates a stage with inputs derived from its id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            inputs: json!({ "stage": id }),
            id,
            apply_calls: Arc::new(AtomicUsize::new(0)),
            destroy_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Overrides the declared inputs.
    #[must_use]
    pub fn with_inputs(mut self, inputs: serde_json::Value) -> Self {
        self.inputs = inputs;
        self
    }

    /// Apply call count.
    #[must_use]
    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    /// Destroy call count.
    #[must_use]
    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for StaticStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn inputs(&self) -> serde_json::Value {
        self.inputs.clone()
    }

    async fn apply(&self, _ctx: &StageContext) -> Result<ResourceHandle, ConvergeError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResourceHandle::new(format!("{}-resource", self.id)))
    }

    async fn destroy(&self, _handle: &ResourceHandle) -> Result<(), ConvergeError> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A stage whose apply always fails.
#[derive(Debug, Clone)]
pub struct FailingStage {
    id: String,
}

impl FailingStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn inputs(&self) -> serde_json::Value {
        json!({ "stage": self.id })
    }

    async fn apply(&self, _ctx: &StageContext) -> Result<ResourceHandle, ConvergeError> {
        Err(ConvergeError::Provider(ProviderError::Api {
            status: 500,
            message: "scripted stage failure".to_string(),
        }))
    }

    async fn destroy(&self, _handle: &ResourceHandle) -> Result<(), ConvergeError> {
        Ok(())
    }
}

/// A scanner returning a fixed record set.
pub struct StaticScanner {
    service: &'static str,
    records: Vec<ResourceRecord>,
}

impl StaticScanner {
    /// Creates the scanner.
    #[must_use]
    pub fn new(service: &'static str, records: Vec<ResourceRecord>) -> Self {
        Self { service, records }
    }
}

#[async_trait]
impl ServiceScanner for StaticScanner {
    fn service(&self) -> &str {
        self.service
    }

    async fn scan(&self, _region: &str) -> Result<Vec<ResourceRecord>, ProviderError> {
        Ok(self.records.clone())
    }
}

/// A scanner that always fails.
pub struct FailingScanner {
    service: &'static str,
    reason: String,
}

impl FailingScanner {
    /// Creates the scanner.
    #[must_use]
    pub fn new(service: &'static str, reason: impl Into<String>) -> Self {
        Self {
            service,
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ServiceScanner for FailingScanner {
    fn service(&self) -> &str {
        self.service
    }

    async fn scan(&self, _region: &str) -> Result<Vec<ResourceRecord>, ProviderError> {
        Err(ProviderError::Api {
            status: 403,
            message: self.reason.clone(),
        })
    }
}
