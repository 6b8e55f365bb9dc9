//! Argument Binder
//!
//! Builds the keyword arguments a stage body is invoked with. Precedence,
//! weakest to strongest:
//!
//! 1. declared defaults
//! 2. options whose name matches a parameter
//! 3. call keyword arguments
//! 4. call positional arguments, matched to parameters in declaration order
//!
//! Afterwards the reserved `rnd` and `logger` parameters are injected when the
//! signature declares them and the call did not pass them explicitly.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::random::RandomState;
use super::signature::Signature;
use crate::config::Options;
use crate::logging::StageLogger;
use crate::{Error, Result};

/// Reserved parameter receiving the stage's [`RandomState`].
pub const RANDOM_STATE_PARAM: &str = "rnd";

/// Reserved parameter receiving the call's [`StageLogger`].
pub const LOGGER_PARAM: &str = "logger";

/// Keyword arguments of a call.
pub type Kwargs = Map<String, Value>;

/// One bound argument.
#[derive(Debug, Clone)]
pub enum Argument {
    /// Plain value from a default, an option or the call
    Value(Value),
    /// Injected stage generator
    RandomState(RandomState),
    /// Injected logging facade
    Logger(StageLogger),
}

impl Argument {
    /// The plain value, if this is one.
    #[must_use]
    pub const fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// JSON form used for events and cache keys.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::RandomState(state) => json!({ "random_state": { "seed": state.seed() } }),
            Self::Logger(logger) => json!({ "logger": logger.stage() }),
        }
    }
}

impl Serialize for Argument {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Capabilities the binder may inject.
#[derive(Debug, Clone, Copy)]
pub struct Injections<'a> {
    /// Generator for `rnd`
    pub random_state: &'a RandomState,
    /// Facade for `logger`
    pub logger: &'a StageLogger,
}

/// Final keyword arguments of one stage call.
#[derive(Debug, Clone)]
pub struct ResolvedArguments {
    function: String,
    values: BTreeMap<String, Argument>,
}

impl ResolvedArguments {
    /// Name of the function these arguments were bound for.
    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Bound argument by name.
    #[must_use]
    pub fn argument(&self, name: &str) -> Option<&Argument> {
        self.values.get(name)
    }

    /// Plain value bound to `name`.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name).and_then(Argument::as_value)
    }

    /// Typed value bound to `name`.
    ///
    /// # Errors
    /// Returns `Error::MissingArgument` if nothing is bound to `name`, or
    /// `Error::InvalidArgument` if it does not deserialize into `T`
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let argument = self.values.get(name).ok_or_else(|| Error::MissingArgument {
            function: self.function.clone(),
            names: vec![name.to_string()],
        })?;
        serde_json::from_value(argument.to_json()).map_err(|e| Error::InvalidArgument {
            function: self.function.clone(),
            name: name.to_string(),
            message: e.to_string(),
        })
    }

    /// Injected generator, when `rnd` is declared.
    #[must_use]
    pub fn random_state(&self) -> Option<RandomState> {
        match self.values.get(RANDOM_STATE_PARAM) {
            Some(Argument::RandomState(state)) => Some(state.clone()),
            _ => None,
        }
    }

    /// Injected logging facade, when `logger` is declared.
    #[must_use]
    pub fn logger(&self) -> Option<&StageLogger> {
        match self.values.get(LOGGER_PARAM) {
            Some(Argument::Logger(logger)) => Some(logger),
            _ => None,
        }
    }

    /// Whether `name` is bound.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Bound names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Number of bound arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Arguments as JSON, logger excluded; the semantic input of a call.
    #[must_use]
    pub fn without_logger(&self) -> BTreeMap<String, Value> {
        self.values
            .iter()
            .filter(|(name, _)| name.as_str() != LOGGER_PARAM)
            .map(|(name, argument)| (name.clone(), argument.to_json()))
            .collect()
    }

    /// All arguments as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(name, argument)| (name.clone(), argument.to_json()))
                .collect(),
        )
    }
}

impl Serialize for ResolvedArguments {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, argument) in &self.values {
            map.serialize_entry(name, argument)?;
        }
        map.end()
    }
}

/// Bind call arguments, options and defaults for `signature`.
///
/// Checks run in order: unexpected keyword, duplicate argument, too many
/// positional, missing argument. The missing check runs after injection.
///
/// # Errors
/// Returns the first failing check as the matching `Error` variant
pub fn bind(
    signature: &Signature,
    args: &[Value],
    kwargs: &Kwargs,
    options: &Options,
    injections: Injections<'_>,
) -> Result<ResolvedArguments> {
    let function = signature.name();
    let parameters = signature.parameters();

    let unexpected: Vec<String> = kwargs
        .keys()
        .filter(|name| !signature.declares(name))
        .cloned()
        .collect();
    if !unexpected.is_empty() {
        return Err(Error::UnexpectedKeyword {
            function: function.to_string(),
            names: unexpected,
        });
    }

    let duplicates: Vec<String> = parameters
        .iter()
        .take(args.len())
        .filter(|name| kwargs.contains_key(name.as_str()))
        .cloned()
        .collect();
    if !duplicates.is_empty() {
        return Err(Error::DuplicateArgument {
            function: function.to_string(),
            names: duplicates,
        });
    }

    if args.len() > parameters.len() {
        return Err(Error::TooManyPositional {
            function: function.to_string(),
            expected: parameters.len(),
            given: args.len(),
        });
    }

    let mut values: BTreeMap<String, Argument> = signature
        .defaults()
        .iter()
        .map(|(name, value)| (name.clone(), Argument::Value(value.clone())))
        .collect();
    for name in parameters {
        if let Some(value) = options.get(name) {
            values.insert(name.clone(), Argument::Value(value.clone()));
        }
    }
    for (name, value) in kwargs {
        values.insert(name.clone(), Argument::Value(value.clone()));
    }
    for (name, value) in parameters.iter().zip(args) {
        values.insert(name.clone(), Argument::Value(value.clone()));
    }

    let explicit = |name: &str| {
        kwargs.contains_key(name) || parameters.iter().take(args.len()).any(|p| p == name)
    };
    if signature.declares(RANDOM_STATE_PARAM) && !explicit(RANDOM_STATE_PARAM) {
        values.insert(
            RANDOM_STATE_PARAM.to_string(),
            Argument::RandomState(injections.random_state.clone()),
        );
    }
    if signature.declares(LOGGER_PARAM) && !explicit(LOGGER_PARAM) {
        values.insert(
            LOGGER_PARAM.to_string(),
            Argument::Logger(injections.logger.clone()),
        );
    }

    let missing: Vec<String> = parameters
        .iter()
        .filter(|name| !values.contains_key(name.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(Error::MissingArgument {
            function: function.to_string(),
            names: missing,
        });
    }

    Ok(ResolvedArguments {
        function: function.to_string(),
        values,
    })
}
