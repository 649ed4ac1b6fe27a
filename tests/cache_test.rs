//! Integration tests for the interpolating cache

use beliefnet_core::{cache::InterpolatingCache, config::CacheConfig, InferenceError};
use std::cell::Cell;
use test_log::test;

/// `exp` sampled every 0.05 over [0, 1], counting real evaluations in `calls`.
fn sampled_exp(
    calls: &Cell<usize>,
) -> InterpolatingCache<impl FnMut(f64) -> Result<f64, InferenceError> + '_> {
    let mut cache = InterpolatingCache::with_defaults(move |x: f64| {
        calls.set(calls.get() + 1);
        Ok(x.exp())
    })
    .unwrap();
    for i in 0..=20 {
        cache.lookup(i as f64 * 0.05).unwrap();
    }
    cache
}

#[test]
fn dense_samples_answer_midpoints_without_evaluating() {
    let calls = Cell::new(0);
    let mut cache = sampled_exp(&calls);
    assert_eq!(calls.get(), 21);
    assert_eq!(cache.len(), 21);

    for i in 0..20 {
        let x = (i as f64 + 0.5) * 0.05;
        let value = cache.lookup(x).unwrap();
        assert!((value - x.exp()).abs() < 1e-3, "at {x}: {value}");
    }
    assert_eq!(calls.get(), 21);
    assert_eq!(cache.stats().evaluations, 21);
    assert_eq!(cache.stats().hits, 20);
}

#[test]
fn lookups_outside_the_samples_evaluate_once() {
    let calls = Cell::new(0);
    let mut cache = sampled_exp(&calls);

    assert_eq!(cache.lookup(1.5).unwrap(), 1.5f64.exp());
    assert_eq!(cache.lookup(-0.5).unwrap(), (-0.5f64).exp());
    assert_eq!(calls.get(), 23);

    // both are stored now
    cache.lookup(1.5).unwrap();
    cache.lookup(-0.5).unwrap();
    assert_eq!(calls.get(), 23);
    assert_eq!(cache.len(), 23);
}

#[test]
fn wide_brackets_are_evaluated() {
    let calls = Cell::new(0);
    let config = CacheConfig {
        close_enough: 0.01,
        ..CacheConfig::default()
    };
    let mut cache = InterpolatingCache::new(
        |x: f64| {
            calls.set(calls.get() + 1);
            Ok(x.sin())
        },
        &config,
    )
    .unwrap();
    cache.lookup(0.0).unwrap();
    cache.lookup(0.05).unwrap();
    assert_eq!(cache.lookup(0.025).unwrap(), 0.025f64.sin());
    assert_eq!(calls.get(), 3);
}

#[test]
fn invalid_configuration_is_rejected() {
    let config = CacheConfig {
        close_enough: -1.0,
        ..CacheConfig::default()
    };
    assert!(InterpolatingCache::new(|x: f64| Ok(x), &config).is_err());
}
