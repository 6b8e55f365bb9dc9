//! # stagecraft: reproducible experiment stages
//!
//! **Version**: 0.1.0
//!
//! stagecraft turns plain functions into experiment *stages*. A stage draws
//! any argument the caller omits from the experiment's options, receives a
//! deterministic private random generator and a result logger on request,
//! memoizes slow results keyed on its source text and arguments, and reports
//! every call to a set of observers as properly nested start/complete events.
//!
//! ## Design Principles
//!
//! - **Reproducibility**: one root seed determines every stage's generator
//! - **Configuration first**: defaults < options < keyword < positional
//! - **Memoization by identity**: editing a stage's source invalidates its cache
//! - **Observable**: lifecycle events nest the way calls do
//!
//! ## Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use stagecraft::cache::MemoryCache;
//! use stagecraft::stage::{Kwargs, StageDef};
//! use stagecraft::{Experiment, Options};
//!
//! # fn example() -> stagecraft::Result<()> {
//! let options = Options::from_value(json!({"n": 4, "seed": 7}))?;
//! let mut experiment = Experiment::builder("squares")
//!     .options(options)
//!     .cache(Arc::new(MemoryCache::new()))
//!     .build()?;
//!
//! experiment.main(
//!     StageDef::new("main", "sum of squares below n", |args| {
//!         let n: i64 = args.get("n")?;
//!         if let Some(logger) = args.logger() {
//!             logger.set_result("n", n);
//!         }
//!         Ok(json!((0..n).map(|i| i * i).sum::<i64>()))
//!     })
//!     .arg("n")
//!     .arg("logger"),
//! )?;
//!
//! assert_eq!(experiment.seed(), 7);
//! assert_eq!(experiment.run(&[], &Kwargs::new())?, json!(14));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod cache;
pub mod config;
pub mod error;
pub mod experiment;
pub mod logging;
pub mod observer;
pub mod stage;
pub mod tracking;

pub use cache::{CacheKey, CachePolicy, CacheStore, CachedResult, MemoryCache};
pub use config::{OptionScope, Options};
pub use error::{Error, Result};
pub use experiment::{Experiment, ExperimentBuilder};
pub use logging::{ResultCollector, ResultEntry, ResultLogs, ResultSink, StageLogger};
pub use observer::Observer;
pub use stage::{Kwargs, ResolvedArguments, StageDef, StageFunction};
