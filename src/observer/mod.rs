//! Lifecycle observers
//!
//! Every event is an optional method with a no-op default, so heterogeneous
//! observers can coexist and each implements only what it cares about. An
//! error returned by an observer is not suppressed: it aborts the operation
//! that emitted the event.
//!
//! Stage events follow call nesting: a child stage's `stage_started` /
//! `stage_completed` pair always lies strictly inside its caller's pair, so a
//! push-on-start / pop-on-complete stack reconstructs the call tree.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::Options;
use crate::stage::{Kwargs, ResolvedArguments, Signature};
use crate::Result;

/// Receiver of experiment and stage lifecycle events.
#[allow(unused_variables)]
pub trait Observer: Send + Sync {
    /// An experiment was constructed.
    ///
    /// # Errors
    /// Implementation-defined
    fn experiment_created(&self, name: &str, options: &Options) -> Result<()> {
        Ok(())
    }

    /// An experiment run started.
    ///
    /// # Errors
    /// Implementation-defined
    fn experiment_started(
        &self,
        start_time: DateTime<Utc>,
        seed: u64,
        args: &[Value],
        kwargs: &Kwargs,
    ) -> Result<()> {
        Ok(())
    }

    /// An experiment run completed.
    ///
    /// # Errors
    /// Implementation-defined
    fn experiment_completed(&self, stop_time: DateTime<Utc>, result: &Value) -> Result<()> {
        Ok(())
    }

    /// A stage function was created.
    ///
    /// # Errors
    /// Implementation-defined
    fn stage_created(
        &self,
        name: &str,
        doc: Option<&str>,
        source: &str,
        signature: &Signature,
    ) -> Result<()> {
        Ok(())
    }

    /// A stage call started with its bound arguments.
    ///
    /// # Errors
    /// Implementation-defined
    fn stage_started(
        &self,
        name: &str,
        start_time: DateTime<Utc>,
        arguments: &ResolvedArguments,
    ) -> Result<()> {
        Ok(())
    }

    /// The innermost running stage call completed.
    ///
    /// # Errors
    /// Implementation-defined
    fn stage_completed(&self, stop_time: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
}

/// Observer list shared by an experiment and its stages.
///
/// Observers added after a stage was created are still notified by it.
#[derive(Clone, Default)]
pub struct Observers {
    inner: Arc<RwLock<Vec<Arc<dyn Observer>>>>,
}

impl Observers {
    /// Empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// List holding `observers`.
    #[must_use]
    pub fn from_vec(observers: Vec<Arc<dyn Observer>>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(observers)),
        }
    }

    /// Add an observer unless this exact instance is already registered.
    pub fn add(&self, observer: Arc<dyn Observer>) {
        let mut observers = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if !observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
            observers.push(observer);
        }
    }

    /// Remove this exact observer instance, if registered.
    pub fn remove(&self, observer: &Arc<dyn Observer>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|o| !Arc::ptr_eq(o, observer));
    }

    /// Number of observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether no observer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Notify every observer in registration order, stopping at the first error.
    ///
    /// The list lock is not held while observers run, so an observer may
    /// trigger further events.
    ///
    /// # Errors
    /// Returns the first observer error
    pub fn emit(&self, mut notify: impl FnMut(&dyn Observer) -> Result<()>) -> Result<()> {
        for observer in self.snapshot() {
            notify(observer.as_ref())?;
        }
        Ok(())
    }

    fn snapshot(&self) -> Vec<Arc<dyn Observer>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers").field("len", &self.len()).finish()
    }
}
