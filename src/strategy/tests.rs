//! Tests for strategy registration, resolution and the built-in computations

use super::*;
use crate::distribution::{ConditionalDiscrete, Discrete, DiscreteDelta, Gaussian, LinearGaussian};
use KindPattern::{Any, Exact, OneOf};

fn discrete(p: &[f64]) -> Distribution {
    Distribution::Discrete(Discrete::new(p.to_vec()).unwrap())
}

fn gaussian(mean: f64, sd: f64) -> Distribution {
    Distribution::Gaussian(Gaussian::new(mean, sd).unwrap())
}

fn assert_close(a: &[f64], b: &[f64]) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert!((x - y).abs() < 1e-9, "{a:?} != {b:?}");
    }
}

fn probabilities(d: &Distribution) -> Vec<f64> {
    match d {
        Distribution::Discrete(d) => d.probabilities().to_vec(),
        other => panic!("expected Discrete, got {other}"),
    }
}

#[test]
fn signature_matching_with_variadic_tail() {
    let sig = TypeSignature::new(vec![
        SignatureSlot::one(Exact(DistKind::ConditionalDiscrete)),
        SignatureSlot::rest(OneOf(DISCRETE_FAMILY), 0),
    ])
    .unwrap();
    assert!(sig.matches(&[DistKind::ConditionalDiscrete]));
    assert!(sig.matches(&[
        DistKind::ConditionalDiscrete,
        DistKind::Discrete,
        DistKind::Noninformative
    ]));
    assert!(!sig.matches(&[DistKind::ConditionalDiscrete, DistKind::Gaussian]));
    assert!(!sig.matches(&[DistKind::Discrete]));
    assert!(!sig.matches(&[]));

    let at_least_one = TypeSignature::new(vec![
        SignatureSlot::one(Any),
        SignatureSlot::rest(Exact(DistKind::Gaussian), 1),
    ])
    .unwrap();
    assert!(!at_least_one.matches(&[DistKind::Gaussian]));
    assert!(at_least_one.matches(&[DistKind::Gaussian, DistKind::Gaussian]));
    assert_eq!(at_least_one.to_string(), "(_, Gaussian+)");
}

#[test]
fn only_last_slot_may_be_variadic() {
    let err = TypeSignature::new(vec![
        SignatureSlot::rest(Any, 0),
        SignatureSlot::one(Exact(DistKind::Gaussian)),
    ]);
    assert!(matches!(err, Err(InferenceError::InvalidArgument(_))));
}

#[test]
fn duplicate_registration_fails_at_registration_time() {
    let registry = StrategyRegistry::empty();
    let sig = TypeSignature::new(vec![SignatureSlot::one(Any), SignatureSlot::one(Any)]).unwrap();
    registry
        .register("first", sig.clone(), Strategy::posterior(|pi, _| Ok(pi.clone())))
        .unwrap();
    let err = registry
        .register("second", sig.clone(), Strategy::posterior(|_, l| Ok(l.clone())))
        .unwrap_err();
    assert!(matches!(err, InferenceError::DuplicateStrategy { .. }));

    // Same signature under a different role is a different strategy.
    registry
        .register("pi-any", sig, Strategy::pi(|d, _| Ok(d.clone())))
        .unwrap();
    assert_eq!(registry.list_strategies().len(), 2);
}

#[test]
fn resolution_is_deterministic() {
    let registry = StrategyRegistry::create().unwrap();
    let kinds = [DistKind::ConditionalDiscrete, DistKind::Discrete, DistKind::Noninformative];
    let first = registry.resolve(StrategyRole::Pi, &kinds).unwrap();
    for _ in 0..10 {
        let again = registry.resolve(StrategyRole::Pi, &kinds).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(again.name, "conditional-discrete-pi");
    }
}

#[test]
fn no_match_and_ambiguity_are_hard_errors() {
    let registry = StrategyRegistry::create().unwrap();
    let err = registry
        .resolve(StrategyRole::Posterior, &[DistKind::Discrete, DistKind::Gaussian])
        .unwrap_err();
    assert!(matches!(err, InferenceError::NoStrategyFound { .. }));

    let registry = StrategyRegistry::empty();
    registry
        .register(
            "any-first",
            TypeSignature::new(vec![
                SignatureSlot::one(Any),
                SignatureSlot::one(Exact(DistKind::Gaussian)),
            ])
            .unwrap(),
            Strategy::posterior(|pi, _| Ok(pi.clone())),
        )
        .unwrap();
    registry
        .register(
            "any-second",
            TypeSignature::new(vec![
                SignatureSlot::one(Exact(DistKind::Gaussian)),
                SignatureSlot::one(Any),
            ])
            .unwrap(),
            Strategy::posterior(|_, l| Ok(l.clone())),
        )
        .unwrap();
    let err = registry
        .resolve(StrategyRole::Posterior, &[DistKind::Gaussian, DistKind::Gaussian])
        .unwrap_err();
    match err {
        InferenceError::NoStrategyFound { signature, .. } => {
            assert!(signature.contains("ambiguous"))
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(registry
        .resolve(StrategyRole::Posterior, &[DistKind::Gaussian, DistKind::Discrete])
        .is_ok());
}

#[test]
fn builtin_signatures_are_unambiguous_over_common_calls() {
    let registry = StrategyRegistry::create().unwrap();
    let all: Vec<DistKind> = crate::distribution::DistKindSet::all().iter().collect();
    for pi in &all {
        for lambda in &all {
            match registry.resolve(StrategyRole::Posterior, &[*pi, *lambda]) {
                Ok(_) => {}
                Err(InferenceError::NoStrategyFound { signature, .. }) => {
                    assert!(!signature.contains("ambiguous"), "{signature}")
                }
                Err(other) => panic!("unexpected {other:?}"),
            }
        }
    }
}

#[test]
fn conditional_discrete_pi_marginalizes_parents() {
    let registry = StrategyRegistry::create().unwrap();
    // P(x | u): u=0 -> [0.9, 0.1], u=1 -> [0.2, 0.8]
    let table = Distribution::ConditionalDiscrete(
        ConditionalDiscrete::new(vec![2], 2, vec![0.9, 0.1, 0.2, 0.8]).unwrap(),
    );
    let pi = registry.pi(&table, &[discrete(&[0.5, 0.5])]).unwrap();
    assert_close(&probabilities(&pi), &[0.55, 0.45]);

    let flat = registry.pi(&table, &[Distribution::Noninformative]).unwrap();
    assert_close(&probabilities(&flat), &[0.55, 0.45]);

    let given = Distribution::DiscreteDelta(DiscreteDelta::new(2, 1).unwrap());
    let pi = registry.pi(&table, &[given]).unwrap();
    assert_close(&probabilities(&pi), &[0.2, 0.8]);
}

#[test]
fn conditional_discrete_lambda_message_excludes_target() {
    let registry = StrategyRegistry::create().unwrap();
    let table = Distribution::ConditionalDiscrete(
        ConditionalDiscrete::new(vec![2], 2, vec![0.9, 0.1, 0.2, 0.8]).unwrap(),
    );
    let lambda = Distribution::DiscreteDelta(DiscreteDelta::new(2, 1).unwrap());
    let message = registry
        .lambda_message(&LambdaMessageInput {
            conditional: &table,
            lambda: &lambda,
            parent_index: 0,
            pi_messages: &[None],
        })
        .unwrap();
    // likelihood of x=1 under u=0 and u=1, normalized: [0.1, 0.8] / 0.9
    assert_close(&probabilities(&message), &[0.1 / 0.9, 0.8 / 0.9]);
}

#[test]
fn two_parent_lambda_message_weights_other_parent() {
    let registry = StrategyRegistry::create().unwrap();
    // x = u0 OR u1, deterministic
    let table = Distribution::ConditionalDiscrete(
        ConditionalDiscrete::new(
            vec![2, 2],
            2,
            vec![1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0],
        )
        .unwrap(),
    );
    let lambda = Distribution::DiscreteDelta(DiscreteDelta::new(2, 1).unwrap());
    let message = registry
        .lambda_message(&LambdaMessageInput {
            conditional: &table,
            lambda: &lambda,
            parent_index: 0,
            pi_messages: &[None, Some(discrete(&[0.75, 0.25]))],
        })
        .unwrap();
    // u0=0: x=1 only when u1=1 (0.25); u0=1: always (1.0)
    assert_close(&probabilities(&message), &[0.2, 0.8]);
}

#[test]
fn linear_gaussian_pi_and_lambda_message() {
    let registry = StrategyRegistry::create().unwrap();
    let model =
        Distribution::LinearGaussian(LinearGaussian::new(vec![2.0, 1.0], 1.0, 1.0).unwrap());
    let pi = registry
        .pi(&model, &[gaussian(1.0, 1.0), Distribution::GaussianDelta(3.0)])
        .unwrap();
    // mean = 2*1 + 3 + 1 = 6, var = 1 + 4*1 = 5
    match pi {
        Distribution::Gaussian(g) => {
            assert!((g.mean - 6.0).abs() < 1e-12);
            assert!((g.variance() - 5.0).abs() < 1e-12);
        }
        other => panic!("expected Gaussian, got {other}"),
    }

    let lambda = Distribution::GaussianDelta(10.0);
    let message = registry
        .lambda_message(&LambdaMessageInput {
            conditional: &model,
            lambda: &lambda,
            parent_index: 0,
            pi_messages: &[None, Some(Distribution::GaussianDelta(3.0))],
        })
        .unwrap();
    // u0 = (10 - 1 - 3) / 2 = 3, var = 1 / 4
    match message {
        Distribution::Gaussian(g) => {
            assert!((g.mean - 3.0).abs() < 1e-12);
            assert!((g.variance() - 0.25).abs() < 1e-12);
        }
        other => panic!("expected Gaussian, got {other}"),
    }

    let blind = registry
        .pi(&model, &[Distribution::Noninformative, gaussian(0.0, 1.0)])
        .unwrap();
    assert_eq!(blind, Distribution::Noninformative);
}

#[test]
fn posterior_strategies() {
    let registry = StrategyRegistry::create().unwrap();
    let post = registry
        .posterior(&discrete(&[0.5, 0.5]), &discrete(&[0.2, 0.8]))
        .unwrap();
    assert_close(&probabilities(&post), &[0.2, 0.8]);

    let post = registry
        .posterior(&gaussian(0.0, 1.0), &gaussian(2.0, 1.0))
        .unwrap();
    match post {
        Distribution::Gaussian(g) => {
            assert!((g.mean - 1.0).abs() < 1e-12);
            assert!((g.variance() - 0.5).abs() < 1e-12);
        }
        other => panic!("expected Gaussian, got {other}"),
    }

    let prior = discrete(&[0.3, 0.7]);
    assert_eq!(
        registry.posterior(&prior, &Distribution::Noninformative).unwrap(),
        prior
    );
    let evidence = Distribution::GaussianDelta(4.0);
    assert_eq!(
        registry.posterior(&gaussian(0.0, 1.0), &evidence).unwrap(),
        evidence
    );
}

#[test]
fn conflicting_evidence_is_numerical_error() {
    let a = Distribution::GaussianDelta(1.0);
    let b = Distribution::GaussianDelta(2.0);
    assert!(matches!(
        builtin::gaussian_product([&a, &b].into_iter()),
        Err(InferenceError::Numerical(_))
    ));
    let x = discrete(&[1.0, 0.0]);
    let y = discrete(&[0.0, 1.0]);
    assert!(matches!(
        builtin::discrete_product([&x, &y].into_iter()),
        Err(InferenceError::Numerical(_))
    ));
}
