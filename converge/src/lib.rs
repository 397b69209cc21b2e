//! # Converge
//!
//! A convergence pipeline for declarative cloud deployments.
//!
//! Converge turns one declared deployment (network, security group, DNS
//! zone, registrar delegation, TLS certificate, edge) into ordered stage
//! executions with support for:
//!
//! - **Dependency-ordered sequencing**: stages run after everything they
//!   depend on, with deterministic tie-breaking
//! - **Fingerprint idempotency**: a stage whose declared inputs are
//!   unchanged is skipped and its recorded handle reused
//! - **Resumable failure handling**: a failed run halts without rollback
//!   and the next run picks up at the failure point
//! - **External delegation**: registrar nameserver sync as a first-class
//!   stage with verified no-op semantics
//! - **Inventory**: concurrent per-service resource enumeration with
//!   partial-failure reporting
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use converge::prelude::*;
//!
//! let sequencer = Sequencer::new(store)
//!     .stage(StageSpec::new(network))
//!     .stage(StageSpec::new(security).depends_on("network"))
//!     .stage(StageSpec::new(zone).depends_on("network"));
//!
//! let report = sequencer.apply().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cert;
pub mod config;
pub mod errors;
pub mod fingerprint;
pub mod handle;
pub mod inventory;
pub mod pipeline;
pub mod provider;
pub mod registrar;
pub mod retry;
pub mod stages;
pub mod state;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cert::{
        CertificateAuthority, CertificateRequest, CertificateStatus, ValidationChallenge,
        ValidationWaiter,
    };
    pub use crate::config::{
        ComputeConfig, DeploymentConfig, NetworkConfig, RegistrarConfig, SecurityConfig,
        ValidationConfig,
    };
    pub use crate::errors::{ConvergeError, CycleError, ProviderError, RegistrarError};
    pub use crate::fingerprint::Fingerprint;
    pub use crate::handle::ResourceHandle;
    pub use crate::inventory::{
        InventoryCollector, InventoryReport, ReportStore, ResourceRecord, ServiceEntry,
        ServiceScanner,
    };
    pub use crate::pipeline::{ApplyReport, DestroyReport, Sequencer, StageSpec};
    pub use crate::provider::{CloudProvider, CreatedResource, ResourceKind, RestCloudProvider};
    pub use crate::registrar::{DelegationClient, PorkbunClient, Registrar, SyncOutcome};
    pub use crate::retry::{retry_if, Backoff, Jitter, RetryPolicy};
    pub use crate::stages::{
        ids, CertificateProvisioner, DelegationProvisioner, EdgeProvisioner, NetworkProvisioner,
        SecurityProvisioner, Stage, StageContext, ZoneProvisioner,
    };
    pub use crate::state::{ConvergenceState, JsonStateStore, MemoryStateStore, StateStore};
}
