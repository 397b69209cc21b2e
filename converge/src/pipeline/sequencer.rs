//! The stage sequencer: plan, apply, destroy.
//!
//! Stages execute strictly sequentially — later stages consume earlier
//! stages' output handles, so there is no concurrency to exploit. Idempotency
//! comes from fingerprint matching against the persisted convergence state:
//! a stage whose declared inputs are unchanged is skipped and its cached
//! handle reused.

use crate::errors::{ConvergeError, CycleError};
use crate::fingerprint::Fingerprint;
use crate::handle::ResourceHandle;
use crate::pipeline::StageSpec;
use crate::stages::StageContext;
use crate::state::{ConvergenceState, StateStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Result of an apply run.
#[derive(Debug)]
pub struct ApplyReport {
    /// Identifier for this run, carried in log lines.
    pub run_id: Uuid,
    /// Stages that executed.
    pub executed: Vec<String>,
    /// Stages skipped on fingerprint match.
    pub skipped: Vec<String>,
    /// All known handles after the run, cached and fresh.
    pub handles: HashMap<String, ResourceHandle>,
}

/// Result of a destroy run.
#[derive(Debug)]
pub struct DestroyReport {
    /// Stages whose resources were torn down.
    pub destroyed: Vec<String>,
    /// Stages with no recorded handle, skipped silently.
    pub skipped: Vec<String>,
}

/// Executes stages in dependency order against a state store.
pub struct Sequencer {
    stages: Vec<StageSpec>,
    store: Arc<dyn StateStore>,
}

impl Sequencer {
    /// Creates an empty sequencer over a state store.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            stages: Vec::new(),
            store,
        }
    }

    /// Adds a stage. Declaration order is the tie-breaker between
    /// independent stages.
    #[must_use]
    pub fn stage(mut self, spec: StageSpec) -> Self {
        self.stages.push(spec);
        self
    }

    /// The declared stage specs, in declaration order.
    #[must_use]
    pub fn specs(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Topologically sorts the declared stages.
    ///
    /// Every stage appears after all its dependencies; ties between
    /// independent stages are broken by declaration order, so the plan is
    /// stable and deterministic.
    ///
    /// # Errors
    ///
    /// [`ConvergeError::Validation`] for duplicate ids, self-dependencies,
    /// or edges to undeclared stages; [`ConvergeError::Cycle`] when the
    /// dependency relation is cyclic.
    pub fn plan(&self) -> Result<Vec<String>, ConvergeError> {
        let mut seen = HashSet::new();
        for spec in &self.stages {
            spec.validate()?;
            if !seen.insert(spec.id.as_str()) {
                return Err(ConvergeError::Validation {
                    message: format!("duplicate stage id '{}'", spec.id),
                });
            }
        }
        for spec in &self.stages {
            for dep in &spec.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(ConvergeError::Validation {
                        message: format!(
                            "stage '{}' depends on undeclared stage '{dep}'",
                            spec.id
                        ),
                    });
                }
            }
        }

        let mut remaining: HashMap<&str, usize> = self
            .stages
            .iter()
            .map(|spec| (spec.id.as_str(), spec.depends_on.len()))
            .collect();
        let mut order = Vec::with_capacity(self.stages.len());

        // Kahn's algorithm; each round takes the first ready stage in
        // declaration order.
        while order.len() < self.stages.len() {
            let next = self.stages.iter().find(|spec| {
                remaining
                    .get(spec.id.as_str())
                    .is_some_and(|&degree| degree == 0)
            });
            let Some(next) = next else {
                return Err(self.cycle_error(&remaining).into());
            };
            let id = next.id.clone();
            remaining.remove(id.as_str());
            for spec in &self.stages {
                if spec.depends_on.iter().any(|dep| dep == &id) {
                    if let Some(degree) = remaining.get_mut(spec.id.as_str()) {
                        *degree = degree.saturating_sub(1);
                    }
                }
            }
            order.push(id);
        }

        Ok(order)
    }

    /// Reconstructs a concrete cycle among the stages Kahn's algorithm
    /// could not place.
    fn cycle_error(&self, remaining: &HashMap<&str, usize>) -> CycleError {
        let by_id: HashMap<&str, &StageSpec> = self
            .stages
            .iter()
            .map(|spec| (spec.id.as_str(), spec))
            .collect();

        // Walk dependency edges inside the stuck set until a node repeats.
        let mut path: Vec<&str> = Vec::new();
        let mut current = self
            .stages
            .iter()
            .map(|spec| spec.id.as_str())
            .find(|id| remaining.contains_key(id))
            .unwrap_or_default();

        loop {
            if let Some(pos) = path.iter().position(|&id| id == current) {
                let mut cycle: Vec<String> =
                    path[pos..].iter().map(|id| (*id).to_string()).collect();
                cycle.push(current.to_string());
                return CycleError::new(cycle);
            }
            path.push(current);
            let next = by_id
                .get(current)
                .and_then(|spec| {
                    spec.depends_on
                        .iter()
                        .find(|dep| remaining.contains_key(dep.as_str()))
                })
                .map(String::as_str);
            match next {
                Some(dep) => current = dep,
                // Every stuck node sits on a cycle; this is unreachable but
                // better than a panic if the invariant ever breaks.
                None => return CycleError::new(vec![current.to_string()]),
            }
        }
    }

    /// Applies all stages in plan order.
    ///
    /// Each stage is fingerprinted over its declared inputs first; a match
    /// against the recorded state skips the stage and reuses its cached
    /// handle without any provider call. On success the fingerprint and
    /// handle are recorded together and persisted before the next stage
    /// runs, so a failed run resumes from the failure point.
    ///
    /// # Errors
    ///
    /// [`ConvergeError::StageFailed`] naming the failing stage; completed
    /// upstream stages are not rolled back.
    pub async fn apply(&self) -> Result<ApplyReport, ConvergeError> {
        let order = self.plan()?;
        let mut state = self.store.load().await?;
        let run_id = Uuid::new_v4();

        let mut report = ApplyReport {
            run_id,
            executed: Vec::new(),
            skipped: Vec::new(),
            handles: HashMap::new(),
        };

        tracing::info!(%run_id, stages = order.len(), "starting apply");
        for id in order {
            let spec = self.spec(&id)?;
            let fingerprint = Fingerprint::of(&spec.runner.inputs());

            if let Some(cached) = state.cached_handle(&id, &fingerprint) {
                tracing::info!(stage = %id, fingerprint = %fingerprint, "unchanged, skipping");
                report.handles.insert(id.clone(), cached.clone());
                report.skipped.push(id);
                continue;
            }

            tracing::info!(stage = %id, fingerprint = %fingerprint, "applying");
            let ctx = StageContext::new(id.clone(), report.handles.clone());
            let handle = spec
                .runner
                .apply(&ctx)
                .await
                .map_err(|e| ConvergeError::stage_failed(id.clone(), e))?;

            // Fingerprint and handle land together or not at all.
            state.record(id.clone(), fingerprint, handle.clone());
            self.store.save(&state).await?;

            report.handles.insert(id.clone(), handle);
            report.executed.push(id);
        }

        tracing::info!(
            %run_id,
            executed = report.executed.len(),
            skipped = report.skipped.len(),
            "apply complete"
        );
        Ok(report)
    }

    /// Destroys recorded stages in strict reverse dependency order.
    ///
    /// A stage with no recorded handle is skipped silently. Each successful
    /// teardown removes the stage's record and persists before moving on.
    ///
    /// # Errors
    ///
    /// [`ConvergeError::StageFailed`] naming the stage whose teardown failed;
    /// its record is kept so a later destroy retries it.
    pub async fn destroy(&self) -> Result<DestroyReport, ConvergeError> {
        let mut order = self.plan()?;
        order.reverse();
        let mut state = self.store.load().await?;

        let mut report = DestroyReport {
            destroyed: Vec::new(),
            skipped: Vec::new(),
        };

        for id in order {
            let Some(record) = state.get(&id).cloned() else {
                tracing::debug!(stage = %id, "no recorded handle, skipping");
                report.skipped.push(id);
                continue;
            };
            let spec = self.spec(&id)?;

            tracing::info!(stage = %id, handle = %record.handle.id, "destroying");
            spec.runner
                .destroy(&record.handle)
                .await
                .map_err(|e| ConvergeError::stage_failed(id.clone(), e))?;

            state.remove(&id);
            self.store.save(&state).await?;
            report.destroyed.push(id);
        }

        Ok(report)
    }

    fn spec(&self, id: &str) -> Result<&StageSpec, ConvergeError> {
        self.stages
            .iter()
            .find(|spec| spec.id == id)
            .ok_or_else(|| ConvergeError::Validation {
                message: format!("unknown stage '{id}'"),
            })
    }

    /// Read-only view of the persisted state, for reporting.
    pub async fn state(&self) -> Result<ConvergenceState, ConvergeError> {
        self.store.load().await
    }
}
