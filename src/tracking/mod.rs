//! Experiment tracking
//!
//! [`TrackingObserver`] turns lifecycle events into serialisable records:
//!
//! ```text
//! ExperimentRecord (1) ──< RunRecord (N)
//!        │                     │
//!        └──< StageDescriptor  └──< StageRecord (tree of nested calls)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use stagecraft::stage::{Kwargs, StageDef};
//! use stagecraft::tracking::TrackingObserver;
//! use stagecraft::Experiment;
//!
//! # fn example() -> stagecraft::Result<()> {
//! let tracker = Arc::new(TrackingObserver::new());
//! let mut experiment = Experiment::builder("tracked")
//!     .seed(1)
//!     .observer(tracker.clone())
//!     .build()?;
//! experiment.main(StageDef::new("main", "answer", |_| Ok(json!(42))))?;
//! experiment.run(&[], &Kwargs::new())?;
//!
//! let runs = tracker.runs();
//! assert_eq!(runs[0].result(), Some(&json!(42)));
//! assert_eq!(runs[0].stages()[0].name(), "main");
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

mod experiment_record;
mod run_record;
mod stage_record;

pub use experiment_record::{ExperimentRecord, StageDescriptor};
pub use run_record::{RunRecord, RunStatus};
pub use stage_record::StageRecord;

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;

use crate::config::Options;
use crate::observer::Observer;
use crate::stage::{Kwargs, ResolvedArguments, Signature};
use crate::{Error, Result};

/// Execution times of one stage across all tracked calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSummary {
    /// Stage name
    pub name: String,
    /// Duration of every completed call, in call-completion order
    pub execution_times: Vec<Duration>,
}

#[derive(Debug, Default)]
struct TrackingState {
    experiment: Option<ExperimentRecord>,
    runs: Vec<RunRecord>,
    detached: Vec<StageRecord>,
    open: Vec<StageRecord>,
    in_run: bool,
}

/// Observer building the call tree of every run.
#[derive(Debug, Default)]
pub struct TrackingObserver {
    state: Mutex<TrackingState>,
}

impl TrackingObserver {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The tracked experiment, once `experiment_created` was seen.
    #[must_use]
    pub fn experiment(&self) -> Option<ExperimentRecord> {
        self.lock().experiment.clone()
    }

    /// All runs, including one still in progress.
    #[must_use]
    pub fn runs(&self) -> Vec<RunRecord> {
        self.lock().runs.clone()
    }

    /// Completed stage calls made outside any run.
    #[must_use]
    pub fn detached(&self) -> Vec<StageRecord> {
        self.lock().detached.clone()
    }

    /// Number of stage calls currently in progress.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.lock().open.len()
    }

    /// Per-stage execution times, stages in first-seen order of a depth-first
    /// walk over runs, then detached calls.
    #[must_use]
    pub fn stage_summary(&self) -> Vec<StageSummary> {
        let state = self.lock();
        let roots = state
            .runs
            .iter()
            .flat_map(RunRecord::stages)
            .chain(state.detached.iter());

        let mut index: FxHashMap<&str, usize> = FxHashMap::default();
        let mut summary: Vec<StageSummary> = Vec::new();
        for record in roots.flat_map(StageRecord::walk) {
            let Some(duration) = record.duration() else {
                continue;
            };
            let slot = *index.entry(record.name()).or_insert_with(|| {
                summary.push(StageSummary {
                    name: record.name().to_string(),
                    execution_times: Vec::new(),
                });
                summary.len() - 1
            });
            summary[slot].execution_times.push(duration);
        }
        summary
    }

    /// Serialise experiment and runs as JSON.
    ///
    /// # Errors
    /// Returns error if serialisation fails
    pub fn to_json(&self) -> Result<Value> {
        let state = self.lock();
        Ok(serde_json::json!({
            "experiment": serde_json::to_value(&state.experiment)?,
            "runs": serde_json::to_value(&state.runs)?,
            "detached": serde_json::to_value(&state.detached)?,
        }))
    }

    fn lock(&self) -> MutexGuard<'_, TrackingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Observer for TrackingObserver {
    fn experiment_created(&self, name: &str, options: &Options) -> Result<()> {
        self.lock().experiment = Some(ExperimentRecord::new(name, options.to_value()));
        Ok(())
    }

    fn experiment_started(
        &self,
        start_time: DateTime<Utc>,
        seed: u64,
        args: &[Value],
        kwargs: &Kwargs,
    ) -> Result<()> {
        let mut state = self.lock();
        state.open.clear();
        state.in_run = true;
        state
            .runs
            .push(RunRecord::start(seed, args.to_vec(), kwargs.clone(), start_time));
        Ok(())
    }

    fn experiment_completed(&self, stop_time: DateTime<Utc>, result: &Value) -> Result<()> {
        let mut state = self.lock();
        state.in_run = false;
        let run = state
            .runs
            .last_mut()
            .ok_or_else(|| Error::Observer("experiment completed before it started".into()))?;
        run.complete(stop_time, result.clone());
        Ok(())
    }

    fn stage_created(
        &self,
        name: &str,
        doc: Option<&str>,
        source: &str,
        signature: &Signature,
    ) -> Result<()> {
        if let Some(experiment) = self.lock().experiment.as_mut() {
            experiment.add_stage(StageDescriptor::new(
                name,
                doc.map(str::to_string),
                source,
                signature.clone(),
            ));
        }
        Ok(())
    }

    fn stage_started(
        &self,
        name: &str,
        start_time: DateTime<Utc>,
        arguments: &ResolvedArguments,
    ) -> Result<()> {
        self.lock()
            .open
            .push(StageRecord::start(name, arguments.to_json(), start_time));
        Ok(())
    }

    fn stage_completed(&self, stop_time: DateTime<Utc>) -> Result<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let mut record = state
            .open
            .pop()
            .ok_or_else(|| Error::Observer("stage completed without a running stage".into()))?;
        record.complete(stop_time);

        if let Some(parent) = state.open.last_mut() {
            parent.add_child(record);
        } else if state.in_run {
            if let Some(run) = state.runs.last_mut() {
                run.add_stage(record);
            }
        } else {
            state.detached.push(record);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmatched_completion_is_an_error() {
        let tracker = TrackingObserver::new();
        assert!(matches!(
            tracker.stage_completed(Utc::now()),
            Err(Error::Observer(_))
        ));
        assert!(matches!(
            tracker.experiment_completed(Utc::now(), &Value::Null),
            Err(Error::Observer(_))
        ));
    }

    #[test]
    fn test_experiment_record_created() {
        let tracker = TrackingObserver::new();
        tracker
            .experiment_created("exp", &Options::new().with("lr", 0.5))
            .unwrap();
        let record = tracker.experiment().unwrap();
        assert_eq!(record.name(), "exp");
        assert_eq!(record.options()["lr"], serde_json::json!(0.5));
    }
}
