//! Signature Resolver
//!
//! Extracts parameter names and defaults from a declared function. Catch-all
//! parameters cannot be filled from options by name, so they are rejected.

use std::collections::BTreeMap;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// How a declared parameter receives its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// Must be supplied by the call or by options
    Required,
    /// Falls back to the given value
    Default(Value),
    /// Catch-all positional (`*args`-style), unsupported
    VarPositional,
    /// Catch-all keyword (`**kwargs`-style), unsupported
    VarKeyword,
}

/// A formal parameter of a declared function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    name: String,
    kind: ParamKind,
}

impl Param {
    /// Parameter without a default.
    #[must_use]
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Required,
        }
    }

    /// Parameter with a default value.
    #[must_use]
    pub fn with_default(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Default(value.into()),
        }
    }

    /// Catch-all positional parameter.
    #[must_use]
    pub fn var_positional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::VarPositional,
        }
    }

    /// Catch-all keyword parameter.
    #[must_use]
    pub fn var_keyword(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::VarKeyword,
        }
    }

    /// Parameter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter kind.
    #[must_use]
    pub const fn kind(&self) -> &ParamKind {
        &self.kind
    }
}

/// Resolved, immutable signature of a stage function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    name: String,
    parameters: Vec<String>,
    positional: Vec<String>,
    defaults: BTreeMap<String, Value>,
}

impl Signature {
    /// Resolve the signature of function `name` from its declared parameters.
    ///
    /// # Errors
    /// Returns `Error::UnsupportedSignature` for catch-all parameters or a
    /// parameter name declared twice
    pub fn resolve(name: impl Into<String>, params: &[Param]) -> Result<Self> {
        let name = name.into();
        let mut seen = FxHashSet::default();
        let mut parameters = Vec::with_capacity(params.len());
        let mut positional = Vec::new();
        let mut defaults = BTreeMap::new();

        for param in params {
            let reason = match param.kind() {
                ParamKind::VarPositional => Some(format!(
                    "catch-all positional parameter '*{}' is not supported",
                    param.name()
                )),
                ParamKind::VarKeyword => Some(format!(
                    "catch-all keyword parameter '**{}' is not supported",
                    param.name()
                )),
                _ if !seen.insert(param.name()) => {
                    Some(format!("parameter '{}' is declared twice", param.name()))
                }
                _ => None,
            };
            if let Some(reason) = reason {
                return Err(Error::UnsupportedSignature {
                    function: name,
                    reason,
                });
            }

            parameters.push(param.name().to_string());
            match param.kind() {
                ParamKind::Default(value) => {
                    defaults.insert(param.name().to_string(), value.clone());
                }
                _ => positional.push(param.name().to_string()),
            }
        }

        Ok(Self {
            name,
            parameters,
            positional,
            defaults,
        })
    }

    /// Function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All parameter names in declaration order.
    #[must_use]
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// Parameters without a default, in declaration order.
    #[must_use]
    pub fn positional(&self) -> &[String] {
        &self.positional
    }

    /// Declared defaults.
    #[must_use]
    pub const fn defaults(&self) -> &BTreeMap<String, Value> {
        &self.defaults
    }

    /// Whether `name` is a declared parameter.
    #[must_use]
    pub fn declares(&self, name: &str) -> bool {
        self.parameters.iter().any(|p| p == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_splits_positional_and_defaults() {
        let sig = Signature::resolve(
            "train",
            &[
                Param::required("data"),
                Param::required("rnd"),
                Param::with_default("lr", 0.1),
                Param::with_default("epochs", 5),
            ],
        )
        .unwrap();

        assert_eq!(sig.name(), "train");
        assert_eq!(sig.parameters(), ["data", "rnd", "lr", "epochs"]);
        assert_eq!(sig.positional(), ["data", "rnd"]);
        assert_eq!(sig.defaults().get("lr"), Some(&json!(0.1)));
        assert_eq!(sig.defaults().len(), 2);
        assert!(sig.declares("epochs"));
        assert!(!sig.declares("logger"));
    }

    #[test]
    fn test_resolve_empty() {
        let sig = Signature::resolve("noop", &[]).unwrap();
        assert!(sig.parameters().is_empty());
    }

    #[test]
    fn test_resolve_rejects_var_positional() {
        let err = Signature::resolve("f", &[Param::required("a"), Param::var_positional("args")])
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedSignature { ref function, .. } if function == "f"));
        assert!(err.to_string().contains("*args"));
    }

    #[test]
    fn test_resolve_rejects_var_keyword() {
        let err = Signature::resolve("f", &[Param::var_keyword("kwargs")]).unwrap_err();
        assert!(err.to_string().contains("**kwargs"));
    }

    #[test]
    fn test_resolve_rejects_duplicate_name() {
        let err =
            Signature::resolve("f", &[Param::required("a"), Param::with_default("a", 1)]).unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }
}
