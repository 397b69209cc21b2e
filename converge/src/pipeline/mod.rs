//! Pipeline sequencing.
//!
//! This module provides:
//! - Stage specifications with declared dependency edges
//! - The sequencer: plan, apply, destroy

mod sequencer;
mod spec;

pub use sequencer::{ApplyReport, DestroyReport, Sequencer};
pub use spec::StageSpec;
