//! Experiment Record - root entity of a tracked experiment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stage::Signature;

/// Declared stage, as announced by `stage_created`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageDescriptor {
    name: String,
    doc: Option<String>,
    source: String,
    signature: Signature,
}

impl StageDescriptor {
    /// Describe a stage.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        doc: Option<String>,
        source: impl Into<String>,
        signature: Signature,
    ) -> Self {
        Self {
            name: name.into(),
            doc,
            source: source.into(),
            signature,
        }
    }

    /// Stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stage documentation.
    #[must_use]
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// Stage source text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Stage signature.
    #[must_use]
    pub const fn signature(&self) -> &Signature {
        &self.signature
    }
}

/// Experiment Record represents a tracked experiment.
///
/// This is the root entity of the tracking schema. Each experiment can have
/// multiple runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperimentRecord {
    name: String,
    created_at: DateTime<Utc>,
    options: Value,
    stages: Vec<StageDescriptor>,
}

impl ExperimentRecord {
    /// Create a new experiment record with the given name and options.
    #[must_use]
    pub fn new(name: impl Into<String>, options: Value) -> Self {
        Self {
            name: name.into(),
            created_at: Utc::now(),
            options,
            stages: Vec::new(),
        }
    }

    /// Get the experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the experiment options.
    #[must_use]
    pub const fn options(&self) -> &Value {
        &self.options
    }

    /// Declared stages in creation order.
    #[must_use]
    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    /// Record a declared stage.
    pub fn add_stage(&mut self, stage: StageDescriptor) {
        self.stages.push(stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Param;

    #[test]
    fn test_experiment_record_new() {
        let options = serde_json::json!({"lr": 0.1});
        let record = ExperimentRecord::new("exp", options.clone());
        assert_eq!(record.name(), "exp");
        assert_eq!(record.options(), &options);
        assert!(record.stages().is_empty());
    }

    #[test]
    fn test_experiment_record_stages() {
        let mut record = ExperimentRecord::new("exp", Value::Null);
        let signature = Signature::resolve("train", &[Param::required("lr")]).unwrap();
        record.add_stage(StageDescriptor::new("train", None, "src", signature));
        assert_eq!(record.stages()[0].name(), "train");
        assert_eq!(record.stages()[0].signature().parameters(), ["lr"]);
    }
}
