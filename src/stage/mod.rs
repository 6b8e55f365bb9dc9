//! Stage functions
//!
//! A [`StageDef`] declares a plain function: its name, source text, formal
//! parameters and body. Registering it with an experiment turns it into a
//! [`StageFunction`], which resolves arguments from options on every call,
//! memoizes slow results and reports each call to the experiment's observers.
//!
//! ## Call protocol
//!
//! ```text
//! bind arguments ──> cache key ──> stage_started
//!                                     │
//!                 ┌── hit ────────────┴──────── miss ──┐
//!                 │                                    │
//!     replay result-logs                        run body, capture
//!                 │                             result-logs, time it
//!                 └──────> stage_completed <───────────┘
//!                                                      │
//!                                         store if slower than threshold
//! ```
//!
//! A call that failed after `stage_started` (cache error or body error) still
//! emits `stage_completed` before its error is returned.

mod binder;
mod random;
mod signature;

pub use binder::{
    bind, Argument, Injections, Kwargs, ResolvedArguments, LOGGER_PARAM, RANDOM_STATE_PARAM,
};
pub use random::{derive_seed, root_generator, unseeded, RandomState, SEED_RANGE};
pub use signature::{Param, ParamKind, Signature};

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;

use crate::cache::{CacheKey, CachePolicy, CacheStore, CachedResult};
use crate::config::{OptionStack, Options};
use crate::logging::{ResultLogs, ResultSink, StageLogger};
use crate::observer::Observers;
use crate::{Error, Result};

/// Body of a declared function, invoked with its bound keyword arguments.
pub type StageBody = Arc<dyn Fn(&ResolvedArguments) -> anyhow::Result<Value> + Send + Sync>;

/// Declaration of a plain function to be turned into a stage.
#[derive(Clone)]
pub struct StageDef {
    name: String,
    doc: Option<String>,
    source: String,
    params: Vec<Param>,
    body: StageBody,
    policy: Option<CachePolicy>,
}

impl StageDef {
    /// Declare function `name` with its `source` text and `body`.
    ///
    /// The source text is the function's identity for memoization: any edit
    /// to it invalidates cached results.
    pub fn new<F>(name: impl Into<String>, source: impl Into<String>, body: F) -> Self
    where
        F: Fn(&ResolvedArguments) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            doc: None,
            source: source.into(),
            params: Vec::new(),
            body: Arc::new(body),
            policy: None,
        }
    }

    /// Attach documentation.
    #[must_use]
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Declare a parameter.
    #[must_use]
    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Declare a parameter without a default.
    #[must_use]
    pub fn arg(self, name: impl Into<String>) -> Self {
        self.param(Param::required(name))
    }

    /// Declare a parameter with a default.
    #[must_use]
    pub fn arg_with_default(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.param(Param::with_default(name, value))
    }

    /// Never memoize this stage.
    #[must_use]
    pub const fn no_cache(mut self) -> Self {
        self.policy = Some(CachePolicy::disabled());
        self
    }

    /// Memoize calls slower than `threshold`.
    #[must_use]
    pub const fn caching_threshold(mut self, threshold: Duration) -> Self {
        self.policy = Some(CachePolicy::new(threshold));
        self
    }

    /// Declared name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared source text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Resolve the signature of this declaration.
    ///
    /// # Errors
    /// Returns `Error::UnsupportedSignature` for catch-all or repeated parameters
    pub fn signature(&self) -> Result<Signature> {
        Signature::resolve(self.name.clone(), &self.params)
    }
}

impl fmt::Debug for StageDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDef")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Everything a stage shares with its experiment.
#[derive(Clone)]
pub(crate) struct StageEnv {
    pub(crate) options: Arc<OptionStack>,
    pub(crate) observers: Observers,
    pub(crate) results: Arc<dyn ResultSink>,
    pub(crate) cache: Option<Arc<dyn CacheStore>>,
    pub(crate) policy: CachePolicy,
}

struct StageInner {
    name: String,
    doc: Option<String>,
    source: String,
    signature: Signature,
    body: StageBody,
    seed: u64,
    random: RandomState,
    policy: CachePolicy,
    env: StageEnv,
}

/// A registered stage; cheap to clone, clones share state.
///
/// Equality and hashing use the source text.
#[derive(Clone)]
pub struct StageFunction {
    inner: Arc<StageInner>,
}

impl StageFunction {
    /// Wrap `def` with an already resolved signature and derived seed, then
    /// emit `stage_created`.
    pub(crate) fn new(def: StageDef, signature: Signature, seed: u64, env: StageEnv) -> Result<Self> {
        let policy = def.policy.unwrap_or(env.policy);
        let stage = Self {
            inner: Arc::new(StageInner {
                name: def.name,
                doc: def.doc,
                source: def.source,
                signature,
                body: def.body,
                seed,
                random: RandomState::from_seed(seed),
                policy,
                env,
            }),
        };
        tracing::debug!(stage = %stage.name(), seed, "stage created");
        stage.inner.env.observers.emit(|o| {
            o.stage_created(stage.name(), stage.doc(), stage.source(), stage.signature())
        })?;
        Ok(stage)
    }

    /// Stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Declared documentation.
    #[must_use]
    pub fn doc(&self) -> Option<&str> {
        self.inner.doc.as_deref()
    }

    /// Source text captured at registration.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.inner.source
    }

    /// Resolved signature.
    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.inner.signature
    }

    /// Seed of the stage's private generator.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.inner.seed
    }

    /// Memoization policy.
    #[must_use]
    pub fn policy(&self) -> CachePolicy {
        self.inner.policy
    }

    /// Call the stage against the current options (innermost active scope).
    ///
    /// # Errors
    /// Returns binding errors, observer errors, cache store errors and body
    /// errors, unchanged
    pub fn call(&self, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
        let options = self.inner.env.options.current();
        self.execute(args, kwargs, &options)
    }

    /// Call the stage against an explicit set of options.
    ///
    /// # Errors
    /// Same as [`StageFunction::call`]
    pub fn call_with_options(&self, options: &Options, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
        self.execute(args, kwargs, options)
    }

    fn execute(&self, args: &[Value], kwargs: &Kwargs, options: &Options) -> Result<Value> {
        let inner = &*self.inner;
        let logger = StageLogger::new(inner.name.as_str(), Arc::clone(&inner.env.results));
        let arguments = bind(
            &inner.signature,
            args,
            kwargs,
            options,
            Injections {
                random_state: &inner.random,
                logger: &logger,
            },
        )?;
        tracing::debug!(stage = %inner.name, arguments = %arguments.to_json(), "called");

        let key = CacheKey::for_call(&inner.source, &arguments)?;
        let started = Instant::now();
        inner
            .env
            .observers
            .emit(|o| o.stage_started(&inner.name, Utc::now(), &arguments))?;

        let cache = inner
            .env
            .cache
            .as_ref()
            .filter(|_| inner.policy.enabled());

        // a started call always completes, failed ones included
        let outcome = self.lookup_or_run(cache, &key, &arguments, &logger, started);
        let completed = inner.env.observers.emit(|o| o.stage_completed(Utc::now()));
        let outcome = outcome?;
        completed?;

        match outcome {
            Outcome::Cached(value) => Ok(value),
            Outcome::Executed {
                value,
                result_logs,
                elapsed,
            } => {
                if let Some(cache) = cache {
                    if inner.policy.should_store(elapsed) {
                        tracing::info!(
                            stage = %inner.name,
                            threshold = ?inner.policy.threshold(),
                            "execution exceeded caching threshold, caching result"
                        );
                        cache.store(&key, CachedResult::new(value.clone(), result_logs))?;
                    }
                }
                Ok(value)
            }
        }
    }

    fn lookup_or_run(
        &self,
        cache: Option<&Arc<dyn CacheStore>>,
        key: &CacheKey,
        arguments: &ResolvedArguments,
        logger: &StageLogger,
        started: Instant,
    ) -> Result<Outcome> {
        let inner = &*self.inner;
        if let Some(cache) = cache {
            match cache.lookup(key) {
                Ok(hit) => {
                    let (value, result_logs) = hit.into_parts();
                    logger.replay(&result_logs);
                    tracing::info!(stage = %inner.name, "retrieved result from cache, skipping execution");
                    return Ok(Outcome::Cached(value));
                }
                Err(Error::CacheMiss) => {}
                Err(e) => return Err(e),
            }
        }

        let value = {
            let _span = tracing::info_span!("stage", name = %inner.name, seed = inner.seed).entered();
            (inner.body)(arguments).map_err(|e| stage_error(&inner.name, e))
        };
        let result_logs = logger.take_captured();
        let elapsed = started.elapsed();
        match value {
            Ok(value) => {
                tracing::info!(stage = %inner.name, elapsed = ?elapsed, "completed");
                Ok(Outcome::Executed {
                    value,
                    result_logs,
                    elapsed,
                })
            }
            Err(e) => {
                tracing::warn!(stage = %inner.name, elapsed = ?elapsed, error = %e, "failed");
                Err(e)
            }
        }
    }
}

enum Outcome {
    Cached(Value),
    Executed {
        value: Value,
        result_logs: ResultLogs,
        elapsed: Duration,
    },
}

/// Errors raised by nested stages keep their kind; anything else is wrapped.
fn stage_error(stage: &str, error: anyhow::Error) -> Error {
    match error.downcast::<Error>() {
        Ok(error) => error,
        Err(source) => Error::StageFailed {
            stage: stage.to_string(),
            source,
        },
    }
}

impl PartialEq for StageFunction {
    fn eq(&self, other: &Self) -> bool {
        self.inner.source == other.inner.source
    }
}

impl Eq for StageFunction {}

impl Hash for StageFunction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.source.hash(state);
    }
}

impl fmt::Debug for StageFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageFunction")
            .field("name", &self.inner.name)
            .field("seed", &self.inner.seed)
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}
