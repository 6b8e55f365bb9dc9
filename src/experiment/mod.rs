//! Experiments
//!
//! An [`Experiment`] owns the options, the root random generator, the observer
//! list and the registered stages, one of which is the designated main stage.
//!
//! Stage seeds are drawn from the root generator when a stage is registered,
//! not when it is called: the number and order of registrations determine
//! every stage seed.
//!
//! ## Usage
//!
//! ```rust
//! use serde_json::json;
//! use stagecraft::stage::{Kwargs, StageDef};
//! use stagecraft::{Experiment, Options};
//!
//! # fn example() -> stagecraft::Result<()> {
//! let options = Options::from_value(json!({"scale": 3}))?;
//! let mut experiment = Experiment::builder("scaling").options(options).seed(42).build()?;
//!
//! let scale = experiment.stage(
//!     StageDef::new("scale", "x * scale", |args| {
//!         Ok(json!(args.get::<i64>("x")? * args.get::<i64>("scale")?))
//!     })
//!     .arg("x")
//!     .arg("scale"),
//! )?;
//! experiment.main(StageDef::new("main", "scale(x=2)", move |_| {
//!     let mut kwargs = Kwargs::new();
//!     kwargs.insert("x".into(), json!(2));
//!     Ok(scale.call(&[], &kwargs)?)
//! }))?;
//!
//! assert_eq!(experiment.run(&[], &Kwargs::new())?, json!(6));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::cache::{CachePolicy, CacheStore, DEFAULT_CACHING_THRESHOLD};
use crate::config::{OptionScope, OptionStack, Options};
use crate::logging::{ResultCollector, ResultSink};
use crate::observer::{Observer, Observers};
use crate::stage::{self, Kwargs, StageDef, StageEnv, StageFunction};
use crate::{Error, Result};

/// Option consulted for the root seed when none is given explicitly.
pub const SEED_OPTION: &str = "seed";

/// Builder for [`Experiment`].
pub struct ExperimentBuilder {
    name: String,
    options: Options,
    seed: Option<u64>,
    cache: Option<Arc<dyn CacheStore>>,
    observers: Vec<Arc<dyn Observer>>,
    results: Option<Arc<dyn ResultSink>>,
    threshold: Duration,
}

impl ExperimentBuilder {
    /// Create a new builder for experiment `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Options::new(),
            seed: None,
            cache: None,
            observers: Vec::new(),
            results: None,
            threshold: DEFAULT_CACHING_THRESHOLD,
        }
    }

    /// Set the experiment options.
    #[must_use]
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Pin the root seed.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Memoize stage results in `cache`.
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Add an observer.
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Forward structured results to `sink` instead of a fresh [`ResultCollector`].
    #[must_use]
    pub fn results_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.results = Some(sink);
        self
    }

    /// Default minimum execution time for a stage result to be cached.
    #[must_use]
    pub const fn caching_threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    /// Build the experiment and emit `experiment_created`.
    ///
    /// Without an explicit seed the integer option `seed` is used; failing
    /// that a seed is drawn at random and a warning is logged.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the `seed` option is not a non-negative
    /// integer (and no explicit seed was given), and observer errors raised by
    /// `experiment_created`
    pub fn build(self) -> Result<Experiment> {
        let seed = match self.seed {
            Some(seed) => Some(seed),
            None => seed_option(&self.options)?,
        };
        let seed = match seed {
            Some(seed) => seed,
            None => {
                let seed = stage::unseeded();
                tracing::warn!(
                    experiment = %self.name,
                    seed,
                    "no seed given, using a random one; set it in the options to repeat this experiment"
                );
                seed
            }
        };

        let experiment = Experiment {
            name: self.name,
            seed,
            prng: stage::root_generator(seed),
            options: Arc::new(OptionStack::new(self.options)),
            observers: Observers::from_vec(self.observers),
            results: self
                .results
                .unwrap_or_else(|| Arc::new(ResultCollector::new()) as Arc<dyn ResultSink>),
            cache: self.cache,
            policy: CachePolicy::new(self.threshold),
            stages: FxHashMap::default(),
            main: None,
        };
        tracing::info!(experiment = %experiment.name, seed, "experiment created");
        let base = experiment.options.base();
        experiment
            .observers
            .emit(|o| o.experiment_created(&experiment.name, &base))?;
        Ok(experiment)
    }
}

fn seed_option(options: &Options) -> Result<Option<u64>> {
    match options.get(SEED_OPTION) {
        None => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            Error::Config(format!(
                "option '{SEED_OPTION}' must be a non-negative integer, got {value}"
            ))
        }),
    }
}

/// Container of stages, options, seed and observers.
pub struct Experiment {
    name: String,
    seed: u64,
    prng: StdRng,
    options: Arc<OptionStack>,
    observers: Observers,
    results: Arc<dyn ResultSink>,
    cache: Option<Arc<dyn CacheStore>>,
    policy: CachePolicy,
    stages: FxHashMap<String, StageFunction>,
    main: Option<StageFunction>,
}

impl Experiment {
    /// Create a builder for experiment `name`.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ExperimentBuilder {
        ExperimentBuilder::new(name)
    }

    /// Experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root seed.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Base options.
    #[must_use]
    pub fn options(&self) -> Arc<Options> {
        self.options.base()
    }

    /// Options stage calls currently see (innermost active scope).
    #[must_use]
    pub fn current_options(&self) -> Arc<Options> {
        self.options.current()
    }

    /// Sink receiving every structured result of this experiment.
    #[must_use]
    pub fn results_sink(&self) -> Arc<dyn ResultSink> {
        Arc::clone(&self.results)
    }

    /// Register `def` as an auxiliary stage.
    ///
    /// A stage registered under an existing auxiliary name replaces it.
    ///
    /// # Errors
    /// Returns `Error::MainStageNameTaken` if `def` is named like the main
    /// stage (no seed is consumed in that case), `Error::UnsupportedSignature`
    /// for catch-all parameters, or observer errors raised by `stage_created`
    pub fn stage(&mut self, def: StageDef) -> Result<StageFunction> {
        self.check_not_main(def.name())?;
        let stage = self.convert(def)?;
        self.register(stage.clone());
        Ok(stage)
    }

    /// Register `def` as the main stage.
    ///
    /// # Errors
    /// Returns `Error::DuplicateMainStage` if a main stage exists (no seed is
    /// consumed in that case), plus the errors of [`Experiment::stage`]
    pub fn main(&mut self, def: StageDef) -> Result<StageFunction> {
        if let Some(existing) = &self.main {
            return Err(Error::DuplicateMainStage {
                existing: existing.name().to_string(),
                rejected: def.name().to_string(),
            });
        }
        let stage = self.convert(def)?;
        self.register(stage.clone());
        self.main = Some(stage.clone());
        Ok(stage)
    }

    /// Register an existing stage function as is, keeping its seed.
    ///
    /// # Errors
    /// Returns `Error::MainStageNameTaken` if `stage` is named like the main
    /// stage
    pub fn add_stage(&mut self, stage: StageFunction) -> Result<()> {
        self.check_not_main(stage.name())?;
        self.register(stage);
        Ok(())
    }

    /// Registered stage by name.
    #[must_use]
    pub fn stage_named(&self, name: &str) -> Option<&StageFunction> {
        self.stages.get(name)
    }

    /// The main stage, once registered.
    #[must_use]
    pub const fn main_stage(&self) -> Option<&StageFunction> {
        self.main.as_ref()
    }

    /// All registered stages, in no particular order.
    pub fn stages(&self) -> impl Iterator<Item = &StageFunction> {
        self.stages.values()
    }

    /// Add an observer unless already registered. Existing stages see it too.
    pub fn add_observer(&self, observer: Arc<dyn Observer>) {
        self.observers.add(observer);
    }

    /// Remove an observer.
    pub fn remove_observer(&self, observer: &Arc<dyn Observer>) {
        self.observers.remove(observer);
    }

    /// Overlay option section `section` for stage calls until the scope drops.
    ///
    /// # Errors
    /// Returns `Error::MissingOptionSection` if the section does not exist
    pub fn optionset(&self, section: &str) -> Result<OptionScope> {
        self.options.enter(section)
    }

    /// One scope per section, entered lazily; drop each before taking the next.
    pub fn optionsets<'a>(
        &'a self,
        sections: &'a [&'a str],
    ) -> impl Iterator<Item = Result<OptionScope>> + 'a {
        sections.iter().map(move |section| self.optionset(section))
    }

    /// Run the main stage.
    ///
    /// Emits `experiment_started`, calls the main stage with `args` and
    /// `kwargs`, emits `experiment_completed` and returns the result.
    ///
    /// # Errors
    /// Returns `Error::NoMainStage` if no main stage is registered, and any
    /// error of the main stage call
    pub fn run(&self, args: &[Value], kwargs: &Kwargs) -> Result<Value> {
        let main = self
            .main
            .as_ref()
            .ok_or_else(|| Error::NoMainStage(self.name.clone()))?;

        tracing::info!(experiment = %self.name, seed = self.seed, "experiment started");
        self.observers
            .emit(|o| o.experiment_started(Utc::now(), self.seed, args, kwargs))?;

        let result = main.call(args, kwargs)?;

        self.observers
            .emit(|o| o.experiment_completed(Utc::now(), &result))?;
        tracing::info!(experiment = %self.name, "experiment completed");
        Ok(result)
    }

    fn convert(&mut self, def: StageDef) -> Result<StageFunction> {
        let signature = def.signature()?;
        let seed = stage::derive_seed(&mut self.prng);
        StageFunction::new(def, signature, seed, self.env())
    }

    fn check_not_main(&self, name: &str) -> Result<()> {
        match &self.main {
            Some(main) if main.name() == name => Err(Error::MainStageNameTaken {
                name: name.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn register(&mut self, stage: StageFunction) {
        if let Some(previous) = self.stages.insert(stage.name().to_string(), stage) {
            tracing::warn!(experiment = %self.name, stage = %previous.name(), "stage replaced");
        }
    }

    fn env(&self) -> StageEnv {
        StageEnv {
            options: Arc::clone(&self.options),
            observers: self.observers.clone(),
            results: Arc::clone(&self.results),
            cache: self.cache.clone(),
            policy: self.policy,
        }
    }
}

impl std::fmt::Debug for Experiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Experiment")
            .field("name", &self.name)
            .field("seed", &self.seed)
            .field("stages", &self.stages.len())
            .field("main", &self.main.as_ref().map(StageFunction::name))
            .finish_non_exhaustive()
    }
}
