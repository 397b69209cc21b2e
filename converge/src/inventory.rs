//! Resource inventory enumerator.
//!
//! Scans several independent services and aggregates whatever succeeded into
//! one report. Scanners have no data dependency on each other, so they run
//! concurrently on a small bounded pool; each result lands in its own slot
//! and the slots are merged once all scanners finish. One scanner failing is
//! recorded per-service and never aborts its siblings.

use crate::errors::ProviderError;
use crate::provider::{CloudProvider, ResourceKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Upper bound on concurrently running scanners.
const MAX_CONCURRENT_SCANNERS: usize = 10;

/// One live resource, as reported by a scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Resource identifier.
    pub id: String,
    /// Resource type label.
    pub resource_type: String,
    /// Raw attributes as returned by the provider.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub attributes: serde_json::Value,
}

/// Per-service slot in the report: resources, or the failure that kept the
/// scanner from producing them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ServiceEntry {
    /// The scanner succeeded.
    Resources {
        /// Everything the scanner saw.
        resources: Vec<ResourceRecord>,
    },
    /// The scanner failed; siblings are unaffected.
    ScannerFailed {
        /// Why the scanner failed.
        error: String,
    },
}

/// The aggregate inventory across all scanned services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryReport {
    /// When the scan ran.
    pub generated_at: DateTime<Utc>,
    /// The region scanned.
    pub region: String,
    /// Service name to scan outcome.
    pub services: BTreeMap<String, ServiceEntry>,
}

impl InventoryReport {
    /// Services whose scanner succeeded.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.services
            .values()
            .filter(|entry| matches!(entry, ServiceEntry::Resources { .. }))
            .count()
    }

    /// Services whose scanner failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.services.len() - self.succeeded()
    }

    /// Total resources across all succeeded services.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.services
            .values()
            .map(|entry| match entry {
                ServiceEntry::Resources { resources } => resources.len(),
                ServiceEntry::ScannerFailed { .. } => 0,
            })
            .sum()
    }
}

/// One independent service scanner.
#[async_trait]
pub trait ServiceScanner: Send + Sync {
    /// The service name keying this scanner's report slot.
    fn service(&self) -> &str;

    /// Enumerates the service's live resources in a region.
    async fn scan(&self, region: &str) -> Result<Vec<ResourceRecord>, ProviderError>;
}

/// Scanner over one provider collection.
pub struct KindScanner {
    service: &'static str,
    kind: ResourceKind,
    provider: Arc<dyn CloudProvider>,
}

impl KindScanner {
    /// Creates a scanner for one resource kind.
    #[must_use]
    pub fn new(service: &'static str, kind: ResourceKind, provider: Arc<dyn CloudProvider>) -> Self {
        Self {
            service,
            kind,
            provider,
        }
    }
}

#[async_trait]
impl ServiceScanner for KindScanner {
    fn service(&self) -> &str {
        self.service
    }

    async fn scan(&self, region: &str) -> Result<Vec<ResourceRecord>, ProviderError> {
        let items = self.provider.list(self.kind, region).await?;
        let records = items
            .into_iter()
            .map(|item| {
                let id = item
                    .get("id")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                ResourceRecord {
                    id,
                    resource_type: self.kind.collection().to_string(),
                    attributes: item,
                }
            })
            .collect();
        Ok(records)
    }
}

/// The default scanner set: the services the deployment touches plus the
/// surrounding account furniture worth auditing.
#[must_use]
pub fn default_scanners(provider: Arc<dyn CloudProvider>) -> Vec<Arc<dyn ServiceScanner>> {
    let scan = |service, kind| -> Arc<dyn ServiceScanner> {
        Arc::new(KindScanner::new(service, kind, provider.clone()))
    };
    vec![
        scan("vpc", ResourceKind::Vpc),
        scan("ec2", ResourceKind::Instance),
        scan("rds", ResourceKind::DbInstance),
        scan("lambda", ResourceKind::Function),
        scan("dynamodb", ResourceKind::Table),
        scan("s3", ResourceKind::Bucket),
        scan("elb", ResourceKind::LoadBalancer),
        scan("route53", ResourceKind::HostedZone),
        scan("security_groups", ResourceKind::SecurityGroup),
        scan("acm", ResourceKind::Certificate),
    ]
}

/// Fans scanners out and merges their slots into one report.
pub struct InventoryCollector {
    scanners: Vec<Arc<dyn ServiceScanner>>,
    max_concurrency: usize,
}

impl InventoryCollector {
    /// Creates a collector over the given scanners.
    #[must_use]
    pub fn new(scanners: Vec<Arc<dyn ServiceScanner>>) -> Self {
        Self {
            scanners,
            max_concurrency: MAX_CONCURRENT_SCANNERS,
        }
    }

    /// Overrides the concurrency bound.
    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit.max(1);
        self
    }

    /// Runs every scanner and aggregates the outcomes.
    ///
    /// Never fails as a whole: the report always reflects whichever scanners
    /// succeeded, with `ScannerFailed` markers for the rest.
    pub async fn collect(&self, region: &str) -> InventoryReport {
        let permits = Arc::new(Semaphore::new(self.max_concurrency));

        let tasks = self.scanners.iter().map(|scanner| {
            let scanner = scanner.clone();
            let permits = permits.clone();
            let region = region.to_string();
            tokio::spawn(async move {
                // The semaphore is never closed, so acquire cannot fail.
                let _permit = permits.acquire().await;
                let service = scanner.service().to_string();
                let entry = match scanner.scan(&region).await {
                    Ok(resources) => {
                        tracing::debug!(service = %service, count = resources.len(), "scanned");
                        ServiceEntry::Resources { resources }
                    }
                    Err(e) => {
                        tracing::warn!(service = %service, error = %e, "scanner failed");
                        ServiceEntry::ScannerFailed {
                            error: e.to_string(),
                        }
                    }
                };
                (service, entry)
            })
        });

        let mut services = BTreeMap::new();
        for joined in futures::future::join_all(tasks).await {
            match joined {
                Ok((service, entry)) => {
                    services.insert(service, entry);
                }
                Err(e) => {
                    tracing::error!(error = %e, "scanner task panicked");
                }
            }
        }

        InventoryReport {
            generated_at: Utc::now(),
            region: region.to_string(),
            services,
        }
    }
}

/// Persists reports as timestamped JSON files with a bounded retention
/// window: once more than `keep` reports exist, the oldest are pruned.
pub struct ReportStore {
    directory: PathBuf,
    keep: usize,
}

impl ReportStore {
    /// Creates a store keeping at most `keep` reports.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            directory: directory.into(),
            keep: keep.max(1),
        }
    }

    /// Writes the report and prunes beyond the retention window.
    ///
    /// # Errors
    ///
    /// IO or serialization failure.
    pub async fn save(&self, report: &InventoryReport) -> Result<PathBuf, crate::errors::ConvergeError> {
        tokio::fs::create_dir_all(&self.directory).await?;
        let name = format!(
            "inventory-{}.json",
            report.generated_at.format("%Y%m%dT%H%M%S%3fZ")
        );
        let path = self.directory.join(name);
        let raw = serde_json::to_string_pretty(report)?;
        tokio::fs::write(&path, raw.as_bytes()).await?;
        self.prune().await?;
        Ok(path)
    }

    async fn prune(&self) -> Result<(), crate::errors::ConvergeError> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.directory).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("inventory-") && name.ends_with(".json") {
                entries.push(entry.path());
            }
        }
        // Timestamped names sort chronologically.
        entries.sort();
        while entries.len() > self.keep {
            let oldest = entries.remove(0);
            tracing::debug!(path = %oldest.display(), "pruning old inventory report");
            tokio::fs::remove_file(&oldest).await?;
        }
        Ok(())
    }

    /// The report directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}
