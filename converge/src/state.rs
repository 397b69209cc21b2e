//! Persisted convergence state.
//!
//! Records which stages have completed, under which declared-input
//! fingerprint, and the resource handles they produced. Re-runs consult this
//! record to skip stages whose inputs are unchanged, which is what makes
//! `apply` resumable after a mid-pipeline failure.

use crate::errors::ConvergeError;
use crate::fingerprint::Fingerprint;
use crate::handle::ResourceHandle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// One completed stage: its fingerprint and handle, recorded together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    /// Fingerprint of the declared inputs at the time the stage succeeded.
    pub fingerprint: Fingerprint,
    /// The handle the stage produced.
    pub handle: ResourceHandle,
    /// When the stage completed.
    pub completed_at: DateTime<Utc>,
}

/// Process-wide record of completed stages and known handles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConvergenceState {
    /// Completed stages keyed by stage id.
    #[serde(default)]
    stages: HashMap<String, StageRecord>,
}

impl ConvergenceState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed stage. Fingerprint and handle are stored as one
    /// unit; callers persist the whole state afterwards so a partial update
    /// is never observable.
    pub fn record(&mut self, stage: impl Into<String>, fingerprint: Fingerprint, handle: ResourceHandle) {
        self.stages.insert(
            stage.into(),
            StageRecord {
                fingerprint,
                handle,
                completed_at: Utc::now(),
            },
        );
    }

    /// The record for a stage, if it has completed.
    #[must_use]
    pub fn get(&self, stage: &str) -> Option<&StageRecord> {
        self.stages.get(stage)
    }

    /// The cached handle when the stored fingerprint matches `current`.
    #[must_use]
    pub fn cached_handle(&self, stage: &str, current: &Fingerprint) -> Option<&ResourceHandle> {
        self.stages
            .get(stage)
            .filter(|record| &record.fingerprint == current)
            .map(|record| &record.handle)
    }

    /// Removes a stage's record, returning it if present.
    pub fn remove(&mut self, stage: &str) -> Option<StageRecord> {
        self.stages.remove(stage)
    }

    /// Ids of all completed stages.
    #[must_use]
    pub fn completed_stages(&self) -> Vec<&str> {
        self.stages.keys().map(String::as_str).collect()
    }

    /// Whether any stage has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Storage backend for convergence state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the persisted state; absent storage yields an empty state.
    async fn load(&self) -> Result<ConvergenceState, ConvergeError>;

    /// Persists the state. Must be atomic: a reader never observes a
    /// half-written record.
    async fn save(&self, state: &ConvergenceState) -> Result<(), ConvergeError>;
}

/// In-memory state store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<ConvergenceState>,
}

impl MemoryStateStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with existing state.
    #[must_use]
    pub fn with_state(state: ConvergenceState) -> Self {
        Self {
            inner: Mutex::new(state),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<ConvergenceState, ConvergeError> {
        Ok(self.inner.lock().clone())
    }

    async fn save(&self, state: &ConvergenceState) -> Result<(), ConvergeError> {
        *self.inner.lock() = state.clone();
        Ok(())
    }
}

/// File-backed state store.
///
/// Writes go to a sibling temp file first and are renamed into place, so the
/// fingerprint and handle of a stage land together or not at all.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    /// Creates a store at the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file path.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load(&self) -> Result<ConvergenceState, ConvergeError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => {
                let state = serde_json::from_str(&raw)
                    .map_err(|e| ConvergeError::State(format!("corrupt state file: {e}")))?;
                Ok(state)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConvergenceState::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &ConvergenceState) -> Result<(), ConvergeError> {
        let raw = serde_json::to_string_pretty(state)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
