//! Tests for the belief network engine

use super::*;
use crate::{
    config::{EngineConfig, LoopyConfig},
    context::Context,
    distribution::{Discrete, Distribution},
    error::InferenceError,
    event::{EventSlot, SlotChange},
};
use std::sync::Arc;
use test_log::test;

const SPRINKLER: &str = r#"
BeliefNetwork sprinkler {
    Variable rain {
        type discrete { "no" "yes" }
        distribution Discrete { probabilities { 0.8 0.2 } }
    }
    Variable wet {
        type discrete { "no" "yes" }
        parents { rain }
        distribution ConditionalDiscrete {
            parent-cardinalities { 2 }
            cardinality 2
            probabilities { 0.9 0.1 0.2 0.8 }
        }
    }
}
"#;

fn diamond(class: &str) -> String {
    format!(
        r#"
{class} diamond {{
    Variable a {{
        type discrete {{ "f" "t" }}
        distribution Discrete {{ probabilities {{ 0.7 0.3 }} }}
    }}
    Variable b {{
        type discrete
        parents {{ a }}
        distribution ConditionalDiscrete {{
            parent-cardinalities {{ 2 }} cardinality 2 probabilities {{ 0.8 0.2 0.3 0.7 }}
        }}
    }}
    Variable c {{
        type discrete
        parents {{ a }}
        distribution ConditionalDiscrete {{
            parent-cardinalities {{ 2 }} cardinality 2 probabilities {{ 0.9 0.1 0.4 0.6 }}
        }}
    }}
    Variable d {{
        type discrete
        parents {{ b c }}
        distribution ConditionalDiscrete {{
            parent-cardinalities {{ 2 2 }}
            cardinality 2
            probabilities {{ 0.95 0.05 0.2 0.8 0.2 0.8 0.05 0.95 }}
        }}
    }}
}}
"#
    )
}

fn context() -> Arc<Context> {
    Context::new(EngineConfig::default()).unwrap()
}

fn probabilities(distribution: &Distribution) -> Vec<f64> {
    match distribution {
        Distribution::Discrete(d) => d.probabilities().to_vec(),
        other => panic!("expected a discrete distribution, got {other}"),
    }
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn evidence_on_child_updates_parent() {
    let ctx = context();
    let net = ctx.parse_network(SPRINKLER).unwrap();

    assert_close(probabilities(&net.get_posterior("wet").unwrap())[1], 0.24);

    net.assign_evidence_state("wet", "yes").unwrap();
    let rain = probabilities(&net.get_posterior("rain").unwrap());
    assert_close(rain[1], 2.0 / 3.0);

    // the prior ignores evidence
    assert_close(probabilities(&net.get_prior("rain").unwrap())[1], 0.2);
    assert_close(probabilities(&net.get_prior("wet").unwrap())[1], 0.24);
}

#[test]
fn diamond_retraction_leaves_no_stale_messages() {
    let ctx = context();
    let net = ctx.parse_network(&diamond("BeliefNetwork")).unwrap();

    net.assign_evidence("a", 1.0).unwrap();
    let with_true = probabilities(&net.get_posterior("d").unwrap())[1];
    assert_close(with_true, 0.773);

    net.clear_posterior("a").unwrap();
    let cleared = probabilities(&net.get_posterior("d").unwrap())[1];
    // independent pi messages from b and c
    assert_close(cleared, 0.4475);

    net.assign_evidence("a", 0.0).unwrap();
    let with_false = probabilities(&net.get_posterior("d").unwrap())[1];
    assert_close(with_false, 0.263);
    assert!((with_false - with_true).abs() > 0.1);
    assert!((with_false - cleared).abs() > 0.1);
}

#[test]
fn repeated_evidence_is_a_no_op() {
    let ctx = context();
    let net = ctx.parse_network(&diamond("BeliefNetwork")).unwrap();
    net.assign_evidence("a", 1.0).unwrap();
    let before = net.get_posterior("d").unwrap();
    let generations: Vec<u64> = ["a", "b", "c", "d"]
        .iter()
        .map(|v| net.generation(v).unwrap())
        .collect();

    net.assign_evidence("a", 1.0).unwrap();

    let after: Vec<u64> = ["a", "b", "c", "d"]
        .iter()
        .map(|v| net.generation(v).unwrap())
        .collect();
    assert_eq!(generations, after);
    assert_eq!(net.get_posterior("d").unwrap(), before);
    assert!(net.snapshot("b").unwrap().parents[0].message.is_some());
}

#[test]
fn evidence_must_fit_the_variable() {
    let ctx = context();
    let net = ctx.parse_network(SPRINKLER).unwrap();
    assert!(matches!(
        net.assign_evidence("rain", 2.0),
        Err(InferenceError::InvalidArgument(_))
    ));
    assert!(matches!(
        net.assign_evidence("rain", 0.5),
        Err(InferenceError::InvalidArgument(_))
    ));
    assert!(matches!(
        net.assign_evidence("rain", f64::NAN),
        Err(InferenceError::InvalidArgument(_))
    ));
    assert!(matches!(
        net.assign_evidence_state("rain", "maybe"),
        Err(InferenceError::InvalidArgument(_))
    ));
    assert!(matches!(
        net.assign_evidence("snow", 0.0),
        Err(InferenceError::NotFound(_))
    ));
}

#[test]
fn pull_networks_reject_directed_cycles() {
    let text = r#"
BeliefNetwork cycle {
    Variable x {
        parents { y }
        distribution ConditionalDiscrete { parent-cardinalities { 2 } cardinality 2 probabilities { 0.5 0.5 0.1 0.9 } }
    }
    Variable y {
        parents { x }
        distribution ConditionalDiscrete { parent-cardinalities { 2 } cardinality 2 probabilities { 0.5 0.5 0.1 0.9 } }
    }
}
"#;
    let ctx = context();
    assert!(matches!(
        ctx.parse_network(text),
        Err(InferenceError::InvalidArgument(_))
    ));
    assert!(ctx.network("cycle").is_err());

    let loopy = ctx
        .parse_network(&text.replace("BeliefNetwork", "LoopyBeliefNetwork"))
        .unwrap();
    let posterior = loopy.get_posterior("x").unwrap();
    assert_eq!(posterior.cardinality(), Some(2));
}

#[test]
fn reentrant_message_request_is_a_loop_in_pull_networks() {
    let ctx = context();
    let net = ctx.parse_network(&diamond("BeliefNetwork")).unwrap();
    net.assign_evidence("d", 1.0).unwrap();
    assert!(matches!(
        net.get_posterior("a"),
        Err(InferenceError::LoopDetected(_))
    ));

    // pending requests were released
    net.clear_posterior("d").unwrap();
    assert_close(probabilities(&net.get_posterior("a").unwrap())[1], 0.3);
}

#[test]
fn loopy_sweeps_converge_on_the_diamond() {
    let ctx = context();
    let net = ctx.parse_network(&diamond("LoopyBeliefNetwork")).unwrap();
    net.assign_evidence("d", 1.0).unwrap();
    net.initialize_messages().unwrap();

    let report = net.propagate(&LoopyConfig::default()).unwrap();
    assert!(report.converged, "{report:?}");
    assert!(report.iterations >= 2);
    assert!(report.max_change < 1e-6);

    let a = probabilities(&net.get_posterior("a").unwrap());
    assert!(a[1] > 0.3, "evidence on d should raise a: {a:?}");
    assert_eq!(
        net.get_posterior("d").unwrap().kind(),
        crate::distribution::DistKind::DiscreteDelta
    );

    let damped = net
        .propagate(&LoopyConfig {
            damping: 0.5,
            ..Default::default()
        })
        .unwrap();
    assert!(damped.converged);
    let again = probabilities(&net.get_posterior("a").unwrap());
    assert!((again[1] - a[1]).abs() < 1e-4);
}

#[test]
fn propagate_requires_a_loopy_network() {
    let ctx = context();
    let net = ctx.parse_network(SPRINKLER).unwrap();
    assert!(matches!(
        net.propagate(&LoopyConfig::default()),
        Err(InferenceError::InvalidArgument(_))
    ));
    assert!(net.initialize_messages().is_err());
}

#[test]
fn set_distribution_invalidates_children() {
    let ctx = context();
    let net = ctx.parse_network(SPRINKLER).unwrap();
    assert_close(probabilities(&net.get_posterior("wet").unwrap())[1], 0.24);

    net.set_distribution(
        "rain",
        Distribution::Discrete(Discrete::new(vec![0.5, 0.5]).unwrap()),
    )
    .unwrap();
    assert_close(probabilities(&net.get_posterior("wet").unwrap())[1], 0.45);

    assert!(matches!(
        net.set_distribution("wet", Distribution::Discrete(Discrete::uniform(2).unwrap())),
        Err(InferenceError::InvalidArgument(_))
    ));
}

#[test]
fn clear_all_evidence_restores_the_priors() {
    let ctx = context();
    let net = ctx.parse_network(&diamond("BeliefNetwork")).unwrap();
    net.assign_evidence("a", 1.0).unwrap();
    net.assign_evidence("b", 0.0).unwrap();
    assert_eq!(net.clear_all_evidence().unwrap(), 2);
    assert!(net.snapshots().iter().all(|s| !s.is_evidence()));
    assert_close(probabilities(&net.get_posterior("d").unwrap())[1], 0.4475);

    // nothing left to retract
    assert_eq!(net.clear_all_evidence().unwrap(), 0);
}

#[test]
fn all_posteriors_are_computed_by_name() {
    let ctx = context();
    let net = ctx.parse_network(SPRINKLER).unwrap();
    net.assign_evidence_state("wet", "yes").unwrap();

    let posteriors = net.compute_all_posteriors().unwrap();
    assert_eq!(
        posteriors.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["rain", "wet"]
    );
    assert_close(probabilities(&posteriors["rain"])[1], 2.0 / 3.0);
    assert!(posteriors["wet"].is_delta());
    // every posterior is now cached
    assert!(net.snapshots().iter().all(|s| s.posterior.is_some()));
}

#[test]
fn clear_all_drops_received_messages() {
    let ctx = context();
    let net = ctx.parse_network(SPRINKLER).unwrap();
    net.get_posterior("wet").unwrap();
    assert!(net.snapshot("wet").unwrap().parents[0].message.is_some());

    net.clear_all("wet").unwrap();
    let snapshot = net.snapshot("wet").unwrap();
    assert!(snapshot.parents[0].message.is_none());
    assert!(snapshot.posterior.is_none());
    assert_close(probabilities(&net.get_posterior("wet").unwrap())[1], 0.24);
}

#[test]
fn removing_a_child_drops_its_evidence() {
    let ctx = context();
    let net = ctx.parse_network(SPRINKLER).unwrap();
    net.assign_evidence("wet", 1.0).unwrap();
    assert_close(probabilities(&net.get_posterior("rain").unwrap())[1], 2.0 / 3.0);

    assert!(matches!(
        net.remove_child("rain", &net.key_of("nobody")),
        Err(InferenceError::InvalidArgument(_))
    ));
    net.remove_child("rain", &net.key_of("wet")).unwrap();
    assert!(net.snapshot("rain").unwrap().children.is_empty());
    assert_close(probabilities(&net.get_posterior("rain").unwrap())[1], 0.2);

    // re-adding restores the edge
    net.add_child("rain", &net.key_of("wet")).unwrap();
    assert_close(probabilities(&net.get_posterior("rain").unwrap())[1], 2.0 / 3.0);
}

#[test]
fn information_requires_evidence() {
    let ctx = context();
    let net = ctx.parse_network(SPRINKLER).unwrap();
    assert!(matches!(
        net.compute_information("rain", "wet"),
        Err(InferenceError::InvalidArgument(_))
    ));

    net.assign_evidence("wet", 1.0).unwrap();
    let (p, q): ([f64; 2], [f64; 2]) = ([1.0 / 3.0, 2.0 / 3.0], [0.8, 0.2]);
    let expected: f64 = p.iter().zip(q).map(|(p, q)| p * (p / q).ln()).sum();
    let information = net.compute_information("rain", "wet").unwrap();
    assert!((information - expected).abs() < 1e-9);
}

#[test]
fn observers_see_evidence_and_recomputation() {
    let ctx = context();
    let net = ctx.parse_network(SPRINKLER).unwrap();
    let mut wet_only = net.subscribe(Some("wet"));
    let mut everything = net.subscribe(None);

    net.assign_evidence("wet", 1.0).unwrap();
    net.get_posterior("rain").unwrap();

    let event = wet_only.try_recv().unwrap();
    assert_eq!(event.slot, EventSlot::Evidence);
    assert_eq!(event.change, SlotChange::Computed);
    assert_eq!(event.network, net.fullname());
    assert!(wet_only.try_recv().is_err());

    let mut seen = Vec::new();
    while let Ok(event) = everything.try_recv() {
        seen.push((event.variable, event.slot, event.change));
    }
    assert!(seen.contains(&("rain".to_string(), EventSlot::Pi, SlotChange::Computed)));
    assert!(seen.contains(&("rain".to_string(), EventSlot::Lambda, SlotChange::Computed)));
    assert!(seen.contains(&(
        "rain".to_string(),
        EventSlot::Posterior,
        SlotChange::Computed
    )));
}

const UPPER: &str = r#"
BeliefNetwork upper {
    Variable rain {
        type discrete { "no" "yes" }
        distribution Discrete { probabilities { 0.8 0.2 } }
    }
}
"#;

const LOWER: &str = r#"
BeliefNetwork lower {
    Variable wet {
        type discrete { "no" "yes" }
        parents { upper.rain }
        distribution ConditionalDiscrete {
            parent-cardinalities { 2 }
            cardinality 2
            probabilities { 0.9 0.1 0.2 0.8 }
        }
    }
}
"#;

#[test]
fn remote_child_evidence_can_be_ignored() {
    let ctx = context();
    let upper = ctx.parse_network(UPPER).unwrap();
    let lower = ctx.parse_network(LOWER).unwrap();
    lower.assign_evidence("wet", 1.0).unwrap();

    upper.set_accept_remote_child_evidence(false);
    assert_close(probabilities(&upper.get_posterior("rain").unwrap())[1], 0.2);

    upper.set_accept_remote_child_evidence(true);
    upper.clear_posterior("rain").unwrap();
    assert_close(probabilities(&upper.get_posterior("rain").unwrap())[1], 2.0 / 3.0);

    // and the other direction still sees the parent
    lower.clear_posterior("wet").unwrap();
    assert_close(probabilities(&lower.get_posterior("wet").unwrap())[1], 0.24);
}

#[test]
fn decommissioned_parent_falls_back_to_prior() {
    let ctx = context();
    let upper = ctx.parse_network(UPPER).unwrap();
    let lower = ctx.parse_network(LOWER).unwrap();
    upper.assign_evidence("rain", 1.0).unwrap();
    assert_close(probabilities(&lower.get_posterior("wet").unwrap())[1], 0.8);

    let replacement = ctx.create_network("upper", NetworkKind::Pull).unwrap();
    replacement.load_description(&upper.describe()).unwrap();
    let displaced = ctx.rebind(&replacement).unwrap().unwrap();
    assert!(Arc::ptr_eq(&displaced, &upper));
    assert!(matches!(
        upper.get_posterior("rain"),
        Err(InferenceError::StaleReference(_))
    ));

    lower.clear_all("wet").unwrap();
    assert_close(probabilities(&lower.get_posterior("wet").unwrap())[1], 0.24);
    assert!(!lower.snapshot("wet").unwrap().parents[0].resolved);
}

#[test]
fn unknown_foreign_network_is_an_unknown_parent() {
    let ctx = context();
    let text = LOWER.replace("upper.rain", "ghost.rain");
    match ctx.parse_network(&text) {
        Err(InferenceError::UnknownParent { parent, .. }) => assert_eq!(parent, "ghost.rain"),
        other => panic!("expected unknown parent, got {other:?}"),
    }
    assert!(matches!(
        ctx.network("lower"),
        Err(InferenceError::UnknownNetwork(_))
    ));
}

#[test]
fn missing_foreign_variable_is_tolerated() {
    let ctx = context();
    ctx.parse_network(UPPER).unwrap();
    let lower = ctx
        .parse_network(&LOWER.replace("upper.rain", "upper.snow"))
        .unwrap();
    assert!(!lower.snapshot("wet").unwrap().parents[0].resolved);

    // an unknown parent counts as uniform
    assert_close(probabilities(&lower.get_posterior("wet").unwrap())[1], 0.45);
    let dot = lower.dot_format().unwrap();
    assert!(
        dot.contains(
            "\"localhost:1099/upper.snow\" [label=\"localhost:1099/upper.snow\", color=yellow, style=filled];"
        ),
        "{dot}"
    );
}

#[test]
fn dot_marks_evidence() {
    let ctx = context();
    let net = ctx.parse_network(SPRINKLER).unwrap();
    net.assign_evidence("wet", 0.0).unwrap();
    let dot = net.dot_format().unwrap();
    assert!(dot.starts_with("digraph \"localhost:1099/sprinkler\" {"));
    assert!(dot.contains("subgraph \"cluster_localhost:1099/sprinkler\""));
    assert!(dot.contains("\"localhost:1099/sprinkler.rain\" -> \"localhost:1099/sprinkler.wet\";"));
    assert!(dot.contains("[label=\"wet\", color=gray92, style=filled]"));
    assert!(!dot.contains("[label=\"rain\", color=gray92"));
}

#[test]
fn add_variable_validates_its_arguments() {
    let ctx = context();
    let net = ctx.create_network("built", NetworkKind::Pull).unwrap();
    ctx.bind(&net).unwrap();
    net.add_variable(
        "x",
        VariableType::Discrete { states: None },
        &[],
        Some(Distribution::Discrete(Discrete::uniform(3).unwrap())),
    )
    .unwrap();

    assert!(net.add_variable("x", VariableType::Unknown, &[], None).is_err());
    assert!(net.add_variable("bad name", VariableType::Unknown, &[], None).is_err());
    assert!(net
        .add_variable(
            "y",
            VariableType::Unknown,
            &["x".to_string()],
            Some(Distribution::Discrete(Discrete::uniform(2).unwrap())),
        )
        .is_err());
    assert!(net
        .add_variable(
            "z",
            VariableType::Discrete {
                states: Some(vec!["a".to_string(), "b".to_string()])
            },
            &[],
            Some(Distribution::Discrete(Discrete::uniform(3).unwrap())),
        )
        .is_err());

    net.assign_references().unwrap();
    assert_eq!(net.variable_names(), vec!["x".to_string()]);
    assert_eq!(net.get_posterior("x").unwrap().cardinality(), Some(3));
}

#[test]
fn propagation_tokens_are_unique_per_context() {
    let ctx = context();
    let first = ctx.next_token();
    let second = ctx.next_token();
    assert_ne!(first, second);
    assert_eq!(first.origin, "localhost:1099");
    assert_eq!(second.to_string(), format!("localhost:1099#{}", second.seq));
}
