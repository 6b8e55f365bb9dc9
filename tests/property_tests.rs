//! Property-based tests for stagecraft
//!
//! - Binding precedence and validation invariants
//! - Seed derivation determinism
//! - Cache key identity
//! - Run with ProptestConfig::with_cases(100)

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::{json, Value};
use stagecraft::cache::CacheKey;
use stagecraft::logging::{DiscardResults, ResultEntry, ResultLogs};
use stagecraft::stage::{
    bind, Injections, Kwargs, Param, RandomState, ResolvedArguments, Signature, SEED_RANGE,
};
use stagecraft::{Error, Experiment, Options, StageDef, StageLogger};

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Up to six parameters `p0..pn`, each with an optional integer default.
fn arb_params() -> impl Strategy<Value = Vec<Param>> {
    proptest::collection::vec(proptest::option::of(-1000i64..1000), 1..6).prop_map(|defaults| {
        defaults
            .into_iter()
            .enumerate()
            .map(|(i, default)| match default {
                Some(value) => Param::with_default(format!("p{i}"), value),
                None => Param::required(format!("p{i}")),
            })
            .collect()
    })
}

/// Parameters plus a configuration covering a random subset of them.
fn arb_params_and_options() -> impl Strategy<Value = (Vec<Param>, Options)> {
    arb_params().prop_flat_map(|params| {
        let n = params.len();
        (
            Just(params),
            proptest::collection::vec(proptest::option::of(1000i64..2000), n),
        )
            .prop_map(|(params, option_values)| {
                let mut options = Options::new();
                for (param, value) in params.iter().zip(option_values) {
                    if let Some(value) = value {
                        options.insert(param.name(), value);
                    }
                }
                (params, options)
            })
    })
}

fn bind_plain(
    signature: &Signature,
    args: &[Value],
    kwargs: &Kwargs,
    options: &Options,
) -> stagecraft::Result<ResolvedArguments> {
    let random_state = RandomState::from_seed(0);
    let logger = StageLogger::new(signature.name(), Arc::new(DiscardResults));
    bind(
        signature,
        args,
        kwargs,
        options,
        Injections {
            random_state: &random_state,
            logger: &logger,
        },
    )
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // ========================================================================
    // Binding Properties
    // ========================================================================

    /// Property: an empty call with no options is missing exactly the
    /// parameters without defaults
    #[test]
    fn prop_missing_iff_no_default(params in arb_params()) {
        let signature = Signature::resolve("f", &params).unwrap();
        let expected: Vec<String> = params
            .iter()
            .filter(|p| matches!(p.kind(), stagecraft::stage::ParamKind::Required))
            .map(|p| p.name().to_string())
            .collect();

        match bind_plain(&signature, &[], &Kwargs::new(), &Options::new()) {
            Ok(resolved) => prop_assert!(expected.is_empty() && resolved.len() == params.len()),
            Err(Error::MissingArgument { names, .. }) => prop_assert_eq!(names, expected),
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }

    /// Property: without call arguments a parameter takes its option value,
    /// else its default
    #[test]
    fn prop_option_then_default((params, options) in arb_params_and_options()) {
        let signature = Signature::resolve("f", &params).unwrap();
        let result = bind_plain(&signature, &[], &Kwargs::new(), &options);

        let all_bound = signature
            .parameters()
            .iter()
            .all(|p| options.contains(p) || signature.defaults().contains_key(p));
        prop_assert_eq!(result.is_ok(), all_bound);

        if let Ok(resolved) = result {
            for name in signature.parameters() {
                let expected = options
                    .get(name)
                    .or_else(|| signature.defaults().get(name))
                    .cloned();
                prop_assert_eq!(resolved.value(name).cloned(), expected);
            }
        }
    }

    /// Property: explicit arguments beat options and defaults
    #[test]
    fn prop_explicit_wins(
        default in 0i64..100,
        option in 100i64..200,
        explicit in 200i64..300,
        positional in any::<bool>(),
    ) {
        let signature = Signature::resolve("f", &[Param::with_default("p", default)]).unwrap();
        let options = Options::new().with("p", option);
        let mut kwargs = Kwargs::new();
        let args = if positional {
            vec![json!(explicit)]
        } else {
            kwargs.insert("p".to_string(), json!(explicit));
            Vec::new()
        };

        let resolved = bind_plain(&signature, &args, &kwargs, &options).unwrap();
        prop_assert_eq!(resolved.value("p"), Some(&json!(explicit)));
    }

    /// Property: a keyword outside the declared parameters is rejected
    #[test]
    fn prop_unexpected_keyword_iff_undeclared(params in arb_params(), index in 0usize..10) {
        let signature = Signature::resolve("f", &params).unwrap();
        let name = format!("p{index}");
        let mut kwargs = Kwargs::new();
        kwargs.insert(name.clone(), json!(0));

        let result = bind_plain(&signature, &[], &kwargs, &Options::new());
        let rejected = matches!(result, Err(Error::UnexpectedKeyword { .. }));
        prop_assert_eq!(rejected, !signature.declares(&name));
    }

    /// Property: a keyword for a slot filled positionally is a duplicate
    #[test]
    fn prop_duplicate_iff_slot_taken(
        params in arb_params(),
        n_positional in 0usize..6,
        keyword in 0usize..6,
    ) {
        let signature = Signature::resolve("f", &params).unwrap();
        prop_assume!(keyword < params.len());
        prop_assume!(n_positional <= params.len());

        let args: Vec<Value> = (0..n_positional).map(|i| json!(i)).collect();
        let mut kwargs = Kwargs::new();
        kwargs.insert(format!("p{keyword}"), json!(-1));

        let result = bind_plain(&signature, &args, &kwargs, &Options::new());
        let duplicate = matches!(result, Err(Error::DuplicateArgument { .. }));
        prop_assert_eq!(duplicate, keyword < n_positional);
    }

    // ========================================================================
    // Seed Properties
    // ========================================================================

    /// Property: equal root seeds and registrations give equal stage seeds
    #[test]
    fn prop_seed_determinism(seed in 0u64..1_000_000, stages in 1usize..8) {
        let register = |seed: u64| -> Vec<u64> {
            let mut experiment = Experiment::builder("prop").seed(seed).build().unwrap();
            (0..stages)
                .map(|i| {
                    let name = format!("s{i}");
                    experiment
                        .stage(StageDef::new(name.clone(), name, |_| Ok(Value::Null)))
                        .unwrap()
                        .seed()
                })
                .collect()
        };

        let seeds = register(seed);
        prop_assert_eq!(&seeds, &register(seed));
        prop_assert!(seeds.iter().all(|s| SEED_RANGE.contains(s)));
    }

    // ========================================================================
    // Cache Key Properties
    // ========================================================================

    /// Property: the key is a function of source text and arguments
    #[test]
    fn prop_cache_key_identity(
        source in "[a-z ]{1,32}",
        edit in "[a-z]{1,4}",
        values in proptest::collection::btree_map("[a-z]{1,6}", -100i64..100, 0..5),
    ) {
        let arguments: BTreeMap<String, Value> =
            values.into_iter().map(|(k, v)| (k, json!(v))).collect();

        let key = CacheKey::from_parts(&source, arguments.clone()).unwrap();
        let again = CacheKey::from_parts(&source, arguments.clone()).unwrap();
        prop_assert_eq!(key.digest(), again.digest());

        let edited = CacheKey::from_parts(&format!("{source}{edit}"), arguments).unwrap();
        prop_assert_ne!(key.digest(), edited.digest());
    }

    // ========================================================================
    // Result Log Properties
    // ========================================================================

    /// Property: appending only yields the appended values in order
    #[test]
    fn prop_append_summary(values in proptest::collection::vec(-50i64..50, 1..10)) {
        let mut logs = ResultLogs::new();
        for value in &values {
            logs.push(ResultEntry::Append { name: "v".to_string(), value: json!(value) });
        }
        let summary = logs.summary();
        prop_assert_eq!(summary.get("v"), Some(&json!(values)));
    }
}
