//! Experiment Pipeline Example
//!
//! A small simulated training pipeline: options with named sections, stages
//! pulling their arguments from the options, per-stage random generators,
//! memoization of the slow stage and a call tree built by the tracker.
//!
//! Run with: cargo run --example pipeline

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::json;
use stagecraft::cache::MemoryCache;
use stagecraft::logging::{self, ResultCollector};
use stagecraft::stage::Kwargs;
use stagecraft::tracking::TrackingObserver;
use stagecraft::{Experiment, Options, StageDef};

fn main() -> anyhow::Result<()> {
    logging::init("info")?;
    println!("=== stagecraft Experiment Pipeline ===\n");

    // -------------------------------------------------------------------------
    // 1. Options with a base configuration and two named sections
    // -------------------------------------------------------------------------
    println!("1. Loading options...");

    let options = Options::from_value(json!({
        "seed": 1234,
        "samples": 200,
        "epochs": 5,
        "learning_rate": 0.1,
        "fast": {"epochs": 2},
        "careful": {"epochs": 8, "learning_rate": 0.02},
    }))?;
    println!("   {}", serde_json::to_string(&options)?);

    // -------------------------------------------------------------------------
    // 2. Experiment with a cache, a tracker and a result collector
    // -------------------------------------------------------------------------
    println!("\n2. Building experiment...");

    let cache = Arc::new(MemoryCache::new());
    let tracker = Arc::new(TrackingObserver::new());
    let results = Arc::new(ResultCollector::new());
    let mut experiment = Experiment::builder("regression")
        .options(options)
        .cache(cache.clone())
        .observer(tracker.clone())
        .results_sink(results.clone())
        .caching_threshold(Duration::from_millis(20))
        .build()?;
    println!("   Seed: {}", experiment.seed());

    // -------------------------------------------------------------------------
    // 3. Stages
    // -------------------------------------------------------------------------
    println!("\n3. Registering stages...");

    let load = experiment.stage(
        StageDef::new("load", "noisy samples of y = 3x + 1", |args| {
            let samples: usize = args.get("samples")?;
            let rnd = args
                .random_state()
                .ok_or_else(|| anyhow::anyhow!("rnd not injected"))?;
            // slow enough to be memoized
            std::thread::sleep(Duration::from_millis(50));
            let data: Vec<(f64, f64)> = rnd.with(|rng| {
                (0..samples)
                    .map(|_| {
                        let x: f64 = rng.gen_range(-1.0..1.0);
                        (x, 3.0f64.mul_add(x, 1.0) + rng.gen_range(-0.1..0.1))
                    })
                    .collect()
            });
            Ok(serde_json::to_value(data)?)
        })
        .doc("Generate a noisy linear dataset")
        .arg("samples")
        .arg("rnd"),
    )?;

    let fit = experiment.stage(
        StageDef::new("fit", "gradient descent on (w, b)", |args| {
            let data: Vec<(f64, f64)> = args.get("data")?;
            let epochs: usize = args.get("epochs")?;
            let learning_rate: f64 = args.get("learning_rate")?;
            let logger = args
                .logger()
                .ok_or_else(|| anyhow::anyhow!("logger not injected"))?;

            #[allow(clippy::cast_precision_loss)]
            let n = data.len() as f64;
            let (mut w, mut b) = (0.0f64, 0.0f64);
            for epoch in 0..epochs {
                let (mut gw, mut gb, mut loss) = (0.0, 0.0, 0.0);
                for (x, y) in &data {
                    let err = w.mul_add(*x, b) - y;
                    gw += err * x;
                    gb += err;
                    loss += err * err;
                }
                w -= learning_rate * 2.0 * gw / n;
                b -= learning_rate * 2.0 * gb / n;
                logger.append_result("loss", loss / n);
                logger.debug(format!("epoch {epoch}: loss={:.4}", loss / n));
            }
            logger.set_results([("w", json!(w)), ("b", json!(b))]);
            Ok(json!({"w": w, "b": b}))
        })
        .doc("Fit a line to the data")
        .arg("data")
        .arg("epochs")
        .arg("learning_rate")
        .arg("logger")
        .no_cache(),
    )?;

    experiment.main(
        StageDef::new("main", "fit(load())", move |_| {
            let data = load.call(&[], &Kwargs::new())?;
            let mut kwargs = Kwargs::new();
            kwargs.insert("data".to_string(), data);
            Ok(fit.call(&[], &kwargs)?)
        })
        .doc("Load the data, then fit it"),
    )?;

    for stage in experiment.stages() {
        println!(
            "   {:<5} seed={:<6} params={:?}",
            stage.name(),
            stage.seed(),
            stage.signature().parameters()
        );
    }

    // -------------------------------------------------------------------------
    // 4. Runs: base options, then each section
    // -------------------------------------------------------------------------
    println!("\n4. Running...");

    let model = experiment.run(&[], &Kwargs::new())?;
    println!("   base:    {model}");

    for section in ["fast", "careful"] {
        let _scope = experiment.optionset(section)?;
        let model = experiment.run(&[], &Kwargs::new())?;
        println!("   {section:<8} {model}");
    }

    // -------------------------------------------------------------------------
    // 5. Cache, results and tracking
    // -------------------------------------------------------------------------
    println!("\n5. Cache entries: {}", cache.len());

    println!("\n6. Results logged by fit across runs:");
    let summary = results.results_for("fit").summary();
    println!("   {}", serde_json::to_string(&summary)?);

    println!("\n7. Stage summary:");
    for stage in tracker.stage_summary() {
        println!("   {:<5} {:?}", stage.name, stage.execution_times);
    }

    println!("\n8. Run call trees:");
    for (i, run) in tracker.runs().iter().enumerate() {
        for root in run.stages() {
            let children: Vec<&str> = root.children().iter().map(|c| c.name()).collect();
            println!("   run {i}: {} -> {children:?}", root.name());
        }
    }

    println!("\n=== Pipeline Complete ===");
    Ok(())
}
