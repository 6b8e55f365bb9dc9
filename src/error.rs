//! Error types for stagecraft
//!
//! Binding and registration failures are programming errors in stage
//! declarations or call sites. They are raised synchronously and never retried.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Stagecraft error types
#[derive(Error, Debug)]
pub enum Error {
    /// Declared function cannot take part in option filling
    #[error("{function}() has an unsupported signature: {reason}")]
    UnsupportedSignature {
        /// Declared function name
        function: String,
        /// What was rejected
        reason: String,
    },

    /// Call keyword argument that is not a declared parameter
    #[error("{function}() got unexpected keyword argument(s): {names:?}")]
    UnexpectedKeyword {
        /// Stage function name
        function: String,
        /// Offending keyword names
        names: Vec<String>,
    },

    /// Keyword argument targets a slot already filled positionally
    #[error("{function}() got multiple values for argument(s) {names:?}")]
    DuplicateArgument {
        /// Stage function name
        function: String,
        /// Parameters bound twice
        names: Vec<String>,
    },

    /// More positional arguments than declared parameters
    #[error("{function}() takes at most {expected} arguments ({given} given)")]
    TooManyPositional {
        /// Stage function name
        function: String,
        /// Number of declared parameters
        expected: usize,
        /// Number of positional arguments passed
        given: usize,
    },

    /// Parameters still unbound after defaults, options and call arguments
    #[error("{function}() is missing value(s) for {names:?}\nPass them explicitly or add them to the experiment options")]
    MissingArgument {
        /// Stage function name
        function: String,
        /// Unbound parameters
        names: Vec<String>,
    },

    /// A second main stage was registered
    #[error("Only one main stage is allowed: '{existing}' is already main, rejected '{rejected}'")]
    DuplicateMainStage {
        /// Current main stage
        existing: String,
        /// Stage that was refused
        rejected: String,
    },

    /// An auxiliary stage would replace the main stage in the registry
    #[error("Stage '{name}' is the main stage and cannot be replaced by another stage of that name")]
    MainStageNameTaken {
        /// Main stage name
        name: String,
    },

    /// The experiment was run before a main stage was registered
    #[error("Experiment '{0}' has no main stage\nRegister one with Experiment::main before running")]
    NoMainStage(String),

    /// Cache store has no entry for the key (expected, handled internally)
    #[error("cache miss")]
    CacheMiss,

    /// `optionset` named a section that is absent or not a mapping
    #[error("Option section '{0}' is missing or is not a mapping")]
    MissingOptionSection(String),

    /// Bound argument could not be converted to the requested type
    #[error("{function}(): argument '{name}' has an unexpected type: {message}")]
    InvalidArgument {
        /// Stage function name
        function: String,
        /// Argument name
        name: String,
        /// Conversion failure
        message: String,
    },

    /// Stage body returned an error
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        /// Stage function name
        stage: String,
        /// Error returned by the body
        #[source]
        source: anyhow::Error,
    },

    /// Observer failed while handling an event
    #[error("Observer error: {0}")]
    Observer(String),

    /// Configuration could not be read
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this is the expected cache-miss signal rather than a failure.
    #[must_use]
    pub const fn is_cache_miss(&self) -> bool {
        matches!(self, Self::CacheMiss)
    }
}
