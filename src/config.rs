//! Experiment options and scoped option overlays
//!
//! Options are a flat mapping from option name to value. Stage parameters are
//! filled by exact name lookup; no type coercion is performed. A value that is
//! itself a mapping can serve as an option *section*, overlaid on top of the
//! current options for a block of stage calls.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Flat option store consulted by the argument binder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options {
    values: Map<String, Value>,
}

impl Options {
    /// Create an empty option store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build options from a JSON object.
    ///
    /// # Errors
    /// Returns `Error::Config` if `value` is not an object
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            Value::Null => Ok(Self::new()),
            other => Err(Error::Config(format!(
                "options must be a JSON object, got {other}"
            ))),
        }
    }

    /// Parse options from a JSON string.
    ///
    /// # Errors
    /// Returns error if the string is not valid JSON or not an object
    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(json)?)
    }

    /// Load options from a JSON file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), "loaded config file");
        Self::from_json_str(&text)
    }

    /// Look up an option by exact name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Whether an option with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Set an option, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(name.into(), value.into())
    }

    /// Builder-style [`Options::insert`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// The mapping stored under `name`, if it is one.
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.values.get(name).and_then(Value::as_object)
    }

    /// A copy of these options updated with the entries of section `name`.
    ///
    /// # Errors
    /// Returns `Error::MissingOptionSection` if `name` is absent or not a mapping
    pub fn overlay(&self, name: &str) -> Result<Self> {
        let section = self
            .section(name)
            .ok_or_else(|| Error::MissingOptionSection(name.to_string()))?;
        let mut values = self.values.clone();
        values.extend(section.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(Self { values })
    }

    /// Option names.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Number of options.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no options.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Options as a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

impl From<Map<String, Value>> for Options {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}

/// Base options plus the stack of active overlays.
///
/// Shared between an experiment and all of its stages; the binder always
/// reads [`OptionStack::current`].
#[derive(Debug)]
pub struct OptionStack {
    base: Arc<Options>,
    overlays: Mutex<Overlays>,
}

#[derive(Debug, Default)]
struct Overlays {
    next_id: u64,
    active: Vec<(u64, Arc<Options>)>,
}

impl OptionStack {
    /// Create a stack with no overlays.
    #[must_use]
    pub fn new(base: Options) -> Self {
        Self {
            base: Arc::new(base),
            overlays: Mutex::new(Overlays::default()),
        }
    }

    /// The base options.
    #[must_use]
    pub fn base(&self) -> Arc<Options> {
        Arc::clone(&self.base)
    }

    /// The innermost overlay, or the base options when none is active.
    #[must_use]
    pub fn current(&self) -> Arc<Options> {
        self.lock()
            .active
            .last()
            .map_or_else(|| Arc::clone(&self.base), |(_, options)| Arc::clone(options))
    }

    /// Number of active overlays.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.lock().active.len()
    }

    /// Push the overlay for `section` on top of the current options.
    ///
    /// The overlay stays active until the returned guard is dropped.
    ///
    /// # Errors
    /// Returns `Error::MissingOptionSection` if the current options have no such section
    pub fn enter(self: &Arc<Self>, section: &str) -> Result<OptionScope> {
        let options = Arc::new(self.current().overlay(section)?);
        let mut overlays = self.lock();
        let id = overlays.next_id;
        overlays.next_id += 1;
        overlays.active.push((id, Arc::clone(&options)));
        let depth = overlays.active.len();
        drop(overlays);
        tracing::debug!(section, depth, "entered option scope");
        Ok(OptionScope {
            stack: Arc::clone(self),
            id,
            section: section.to_string(),
            options,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Overlays> {
        self.overlays.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Guard for an active option overlay.
///
/// Dropping the guard removes its own overlay, whether the block exits
/// normally, through `?` or by unwinding. Overlays entered while it was active
/// were built on top of it and keep its values until they are dropped.
#[derive(Debug)]
#[must_use = "the overlay is removed as soon as the scope is dropped"]
pub struct OptionScope {
    stack: Arc<OptionStack>,
    id: u64,
    section: String,
    options: Arc<Options>,
}

impl OptionScope {
    /// Section this scope was entered for.
    #[must_use]
    pub fn section(&self) -> &str {
        &self.section
    }

    /// Options visible while the scope is active.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }
}

impl Drop for OptionScope {
    fn drop(&mut self) {
        self.stack.lock().active.retain(|(id, _)| *id != self.id);
        tracing::debug!(section = %self.section, "left option scope");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Options {
        Options::from_value(json!({
            "lr": 0.1,
            "epochs": 10,
            "fast": {"epochs": 1},
            "slow": {"epochs": 100, "lr": 0.01}
        }))
        .unwrap()
    }

    #[test]
    fn test_options_from_value_rejects_non_object() {
        assert!(matches!(
            Options::from_value(json!([1, 2])),
            Err(Error::Config(_))
        ));
        assert!(Options::from_value(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_options_overlay() {
        let options = sample();
        let fast = options.overlay("fast").unwrap();
        assert_eq!(fast.get("epochs"), Some(&json!(1)));
        assert_eq!(fast.get("lr"), Some(&json!(0.1)));
        // base untouched
        assert_eq!(options.get("epochs"), Some(&json!(10)));
    }

    #[test]
    fn test_options_overlay_missing_section() {
        let options = sample();
        assert!(matches!(
            options.overlay("nope"),
            Err(Error::MissingOptionSection(name)) if name == "nope"
        ));
        assert!(matches!(
            options.overlay("lr"),
            Err(Error::MissingOptionSection(_))
        ));
    }

    #[test]
    fn test_stack_scope_push_pop() {
        let stack = Arc::new(OptionStack::new(sample()));
        assert_eq!(stack.current().get("epochs"), Some(&json!(10)));
        {
            let scope = stack.enter("slow").unwrap();
            assert_eq!(scope.section(), "slow");
            assert_eq!(stack.depth(), 1);
            assert_eq!(stack.current().get("lr"), Some(&json!(0.01)));
        }
        assert_eq!(stack.depth(), 0);
        assert_eq!(stack.current().get("lr"), Some(&json!(0.1)));
    }

    #[test]
    fn test_stack_nested_scopes_overlay_current() {
        let stack = Arc::new(OptionStack::new(sample()));
        let _slow = stack.enter("slow").unwrap();
        let fast = stack.enter("fast").unwrap();
        // fast epochs over slow lr
        assert_eq!(fast.options().get("epochs"), Some(&json!(1)));
        assert_eq!(fast.options().get("lr"), Some(&json!(0.01)));
        drop(fast);
        assert_eq!(stack.current().get("epochs"), Some(&json!(100)));
    }

    #[test]
    fn test_stack_scope_drop_removes_only_its_own_overlay() {
        let stack = Arc::new(OptionStack::new(sample()));
        let outer = stack.enter("slow").unwrap();
        let inner = stack.enter("fast").unwrap();
        drop(outer);
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.current().get("epochs"), Some(&json!(1)));

        let later = stack.enter("slow").unwrap();
        drop(inner);
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.current().get("epochs"), Some(&json!(100)));
        drop(later);
        assert_eq!(stack.depth(), 0);
        assert_eq!(stack.current().get("epochs"), Some(&json!(10)));
    }

    #[test]
    fn test_stack_scope_popped_on_error_path() {
        fn failing(stack: &Arc<OptionStack>) -> Result<()> {
            let _scope = stack.enter("fast")?;
            Err(Error::Other("boom".into()))
        }
        let stack = Arc::new(OptionStack::new(sample()));
        assert!(failing(&stack).is_err());
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_options_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        std::fs::write(&path, r#"{"seed": 42, "lr": 0.5}"#).unwrap();
        let options = Options::from_path(&path).unwrap();
        assert_eq!(options.get("seed"), Some(&json!(42)));
        assert!(matches!(
            Options::from_path(dir.path().join("missing.json")),
            Err(Error::Config(_))
        ));
    }
}
