//! Stage Record - one node of a run's call tree

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single stage call and the stage calls made inside it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageRecord {
    name: String,
    arguments: Value,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    children: Vec<StageRecord>,
}

impl StageRecord {
    /// Record the start of a stage call.
    #[must_use]
    pub fn start(name: impl Into<String>, arguments: Value, started_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            arguments,
            started_at,
            ended_at: None,
            children: Vec::new(),
        }
    }

    /// Stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bound arguments as announced by `stage_started`.
    #[must_use]
    pub const fn arguments(&self) -> &Value {
        &self.arguments
    }

    /// Start timestamp.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// End timestamp, once completed.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Nested stage calls in call order.
    #[must_use]
    pub fn children(&self) -> &[StageRecord] {
        &self.children
    }

    /// Wall-clock duration, once completed.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.ended_at
            .and_then(|end| (end - self.started_at).to_std().ok())
    }

    /// Attach a finished nested call.
    pub fn add_child(&mut self, child: Self) {
        self.children.push(child);
    }

    /// Mark the call completed.
    pub fn complete(&mut self, stop_time: DateTime<Utc>) {
        self.ended_at = Some(stop_time);
    }

    /// This record and all descendants, depth first.
    #[must_use]
    pub fn walk(&self) -> Vec<&Self> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_record_duration() {
        let start = Utc::now();
        let mut record = StageRecord::start("s", Value::Null, start);
        assert!(record.duration().is_none());
        record.complete(start + chrono::Duration::milliseconds(1500));
        assert_eq!(record.duration(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_stage_record_walk() {
        let now = Utc::now();
        let mut root = StageRecord::start("a", Value::Null, now);
        let mut b = StageRecord::start("b", Value::Null, now);
        b.add_child(StageRecord::start("c", Value::Null, now));
        root.add_child(b);
        root.add_child(StageRecord::start("d", Value::Null, now));
        let names: Vec<&str> = root.walk().iter().map(|r| r.name()).collect();
        assert_eq!(names, ["a", "b", "c", "d"]);
    }
}
