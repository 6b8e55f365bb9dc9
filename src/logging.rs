//! Message logging and structured result capture
//!
//! Free-form messages go through `tracing`. Structured results ("set result",
//! "append result") go through a [`StageLogger`], which keeps a verbatim copy
//! for the current call (used for cache replay) and forwards every entry to the
//! experiment's [`ResultSink`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use crate::{Error, Result};

/// Install a `tracing` subscriber printing `LEVEL target: message` lines.
///
/// `RUST_LOG` takes precedence over `default_directive` (e.g. `"info"` or
/// `"stagecraft=debug"`).
///
/// # Errors
/// Returns error if the directive is invalid or a global subscriber is already set
pub fn init(default_directive: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| Error::Config(format!("invalid log directive '{default_directive}': {e}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| Error::Other(format!("logging already initialised: {e}")))
}

/// One structured result operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ResultEntry {
    /// Set (or replace) a named result
    Set {
        /// Result name
        name: String,
        /// Result value
        value: Value,
    },
    /// Append a value to a named result list
    Append {
        /// Result name
        name: String,
        /// Appended value
        value: Value,
    },
}

impl ResultEntry {
    /// Result name this entry targets.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Set { name, .. } | Self::Append { name, .. } => name,
        }
    }
}

/// Ordered result entries captured during one stage call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultLogs {
    entries: Vec<ResultEntry>,
}

impl ResultLogs {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry.
    pub fn push(&mut self, entry: ResultEntry) {
        self.entries.push(entry);
    }

    /// Entries in emission order.
    #[must_use]
    pub fn entries(&self) -> &[ResultEntry] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold the entries into named results.
    ///
    /// `Set` replaces; `Append` pushes onto a list, turning a previously set
    /// scalar into the first list element.
    #[must_use]
    pub fn summary(&self) -> Map<String, Value> {
        let mut results = Map::new();
        for entry in &self.entries {
            match entry {
                ResultEntry::Set { name, value } => {
                    results.insert(name.clone(), value.clone());
                }
                ResultEntry::Append { name, value } => match results.get_mut(name) {
                    Some(Value::Array(items)) => items.push(value.clone()),
                    Some(existing) => {
                        let first = existing.take();
                        *existing = Value::Array(vec![first, value.clone()]);
                    }
                    None => {
                        results.insert(name.clone(), Value::Array(vec![value.clone()]));
                    }
                },
            }
        }
        results
    }
}

impl IntoIterator for ResultLogs {
    type Item = ResultEntry;
    type IntoIter = std::vec::IntoIter<ResultEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Experiment-wide receiver of every structured result.
pub trait ResultSink: Send + Sync {
    /// Called for each entry, including entries replayed from the cache.
    fn record(&self, stage: &str, entry: &ResultEntry);
}

/// Sink collecting all results of an experiment in memory.
#[derive(Debug, Default)]
pub struct ResultCollector {
    logs: Mutex<Vec<(String, ResultEntry)>>,
}

impl ResultCollector {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded entries, merged across stages.
    #[must_use]
    pub fn results(&self) -> ResultLogs {
        let logs = self.lock();
        ResultLogs {
            entries: logs.iter().map(|(_, entry)| entry.clone()).collect(),
        }
    }

    /// Entries recorded by one stage.
    #[must_use]
    pub fn results_for(&self, stage: &str) -> ResultLogs {
        let logs = self.lock();
        ResultLogs {
            entries: logs
                .iter()
                .filter(|(s, _)| s == stage)
                .map(|(_, entry)| entry.clone())
                .collect(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, ResultEntry)>> {
        self.logs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResultSink for ResultCollector {
    fn record(&self, stage: &str, entry: &ResultEntry) {
        self.lock().push((stage.to_string(), entry.clone()));
    }
}

/// Sink that drops every result.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardResults;

impl ResultSink for DiscardResults {
    fn record(&self, _stage: &str, _entry: &ResultEntry) {}
}

/// Logging facade handed to a stage body through the `logger` parameter.
///
/// A new facade, with its own capture buffer, is built for every call, so
/// nested calls never see each other's results.
#[derive(Clone)]
pub struct StageLogger {
    stage: Arc<str>,
    sink: Arc<dyn ResultSink>,
    captured: Arc<Mutex<ResultLogs>>,
}

impl StageLogger {
    /// Create a facade for one call of `stage`.
    #[must_use]
    pub fn new(stage: impl Into<Arc<str>>, sink: Arc<dyn ResultSink>) -> Self {
        Self {
            stage: stage.into(),
            sink,
            captured: Arc::new(Mutex::new(ResultLogs::new())),
        }
    }

    /// Stage this facade reports for.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Log a debug message.
    pub fn debug(&self, message: impl fmt::Display) {
        tracing::debug!(stage = %self.stage, "{message}");
    }

    /// Log an info message.
    pub fn info(&self, message: impl fmt::Display) {
        tracing::info!(stage = %self.stage, "{message}");
    }

    /// Log a warning.
    pub fn warn(&self, message: impl fmt::Display) {
        tracing::warn!(stage = %self.stage, "{message}");
    }

    /// Log an error.
    pub fn error(&self, message: impl fmt::Display) {
        tracing::error!(stage = %self.stage, "{message}");
    }

    /// Set (or replace) a named result.
    pub fn set_result(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.log(ResultEntry::Set {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Set several named results at once.
    pub fn set_results<I, K>(&self, results: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        for (name, value) in results {
            self.set_result(name, value);
        }
    }

    /// Append a value to a named result list.
    pub fn append_result(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.log(ResultEntry::Append {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Re-issue previously captured entries, in order.
    pub fn replay(&self, logs: &ResultLogs) {
        for entry in logs.entries() {
            self.log(entry.clone());
        }
    }

    /// Entries captured by this facade so far.
    #[must_use]
    pub fn captured(&self) -> ResultLogs {
        self.captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Take the captured entries, leaving the buffer empty.
    #[must_use]
    pub fn take_captured(&self) -> ResultLogs {
        std::mem::take(&mut *self.captured.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn log(&self, entry: ResultEntry) {
        tracing::trace!(stage = %self.stage, result = entry.name(), "result logged");
        self.sink.record(&self.stage, &entry);
        self.captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}

impl fmt::Debug for StageLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageLogger")
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}
