//! Stage specifications: the declared dependency graph.

use crate::errors::ConvergeError;
use crate::stages::Stage;
use std::sync::Arc;

/// One stage plus its declared upstream edges.
///
/// Dependencies are kept in declaration order; the sequencer uses that order
/// to break ties between independent stages deterministically.
#[derive(Clone)]
pub struct StageSpec {
    /// The stage id (taken from the runner).
    pub id: String,
    /// Ids of stages that must complete first.
    pub depends_on: Vec<String>,
    /// The stage implementation.
    pub runner: Arc<dyn Stage>,
}

impl StageSpec {
    /// Wraps a stage with no dependencies.
    #[must_use]
    pub fn new(runner: Arc<dyn Stage>) -> Self {
        Self {
            id: runner.id().to_string(),
            depends_on: Vec::new(),
            runner,
        }
    }

    /// Declares an upstream dependency.
    #[must_use]
    pub fn depends_on(mut self, upstream: impl Into<String>) -> Self {
        self.depends_on.push(upstream.into());
        self
    }

    /// Validates the spec in isolation.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the stage depends on itself or
    /// declares the same dependency twice.
    pub fn validate(&self) -> Result<(), ConvergeError> {
        if self.depends_on.iter().any(|dep| dep == &self.id) {
            return Err(ConvergeError::Validation {
                message: format!("stage '{}' cannot depend on itself", self.id),
            });
        }
        for (i, dep) in self.depends_on.iter().enumerate() {
            if self.depends_on[..i].contains(dep) {
                return Err(ConvergeError::Validation {
                    message: format!("stage '{}' declares duplicate dependency '{dep}'", self.id),
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSpec")
            .field("id", &self.id)
            .field("depends_on", &self.depends_on)
            .finish()
    }
}
