//! Run Record - one execution of an experiment's main stage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::StageRecord;
use crate::stage::Kwargs;

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run is currently executing (or failed before completing).
    Running,
    /// Run completed and produced a result.
    Completed,
}

/// Run Record represents a single execution of an experiment.
///
/// A run tracks the execution lifecycle from start to completion together
/// with the tree of stage calls made during it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    seed: u64,
    args: Vec<Value>,
    kwargs: Kwargs,
    status: RunStatus,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    result: Option<Value>,
    stages: Vec<StageRecord>,
}

impl RunRecord {
    /// Start a run record.
    #[must_use]
    pub fn start(seed: u64, args: Vec<Value>, kwargs: Kwargs, started_at: DateTime<Utc>) -> Self {
        Self {
            seed,
            args,
            kwargs,
            status: RunStatus::Running,
            started_at,
            ended_at: None,
            result: None,
            stages: Vec::new(),
        }
    }

    /// Get the experiment seed used for this run.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Positional call arguments.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Keyword call arguments.
    #[must_use]
    pub const fn kwargs(&self) -> &Kwargs {
        &self.kwargs
    }

    /// Get the current run status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Get the start timestamp.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Get the end timestamp, if the run has completed.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Main stage result, if the run has completed.
    #[must_use]
    pub const fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Top-level stage calls of the run.
    #[must_use]
    pub fn stages(&self) -> &[StageRecord] {
        &self.stages
    }

    /// Attach a finished top-level stage call.
    pub fn add_stage(&mut self, stage: StageRecord) {
        self.stages.push(stage);
    }

    /// Complete the run with its result.
    pub fn complete(&mut self, stop_time: DateTime<Utc>, result: Value) {
        self.status = RunStatus::Completed;
        self.ended_at = Some(stop_time);
        self.result = Some(result);
    }
}
