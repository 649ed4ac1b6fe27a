//! Cross-context integration tests
//!
//! Two contexts at different registry locations share one loopback transport, standing in
//! for two hosts. Severing an endpoint makes every call to it fail at the transport.

mod common;

use beliefnet_core::{
    config::EngineConfig,
    context::Context,
    nameinfo::NameInfo,
    network::{BeliefNetwork, LoopbackTransport, PeerStatus, RemotePeer},
    InferenceError,
};
use common::probabilities;
use std::sync::Arc;
use test_log::test;

const HUB: &str = r#"
BeliefNetwork hub {
    Variable center {
        type discrete { "off" "on" }
        distribution Discrete { probabilities { 0.6 0.4 } }
    }
    Variable n1 {
        type discrete
        parents { center }
        distribution ConditionalDiscrete { parent-cardinalities { 2 } cardinality 2 probabilities { 0.9 0.1 0.3 0.7 } }
    }
    Variable n2 {
        type discrete
        parents { center }
        distribution ConditionalDiscrete { parent-cardinalities { 2 } cardinality 2 probabilities { 0.8 0.2 0.4 0.6 } }
    }
    Variable n3 {
        type discrete
        parents { center }
        distribution ConditionalDiscrete { parent-cardinalities { 2 } cardinality 2 probabilities { 0.7 0.3 0.1 0.9 } }
    }
}
"#;

const LEAF: &str = r#"
BeliefNetwork leaf {
    Variable far {
        type discrete { "quiet" "loud" }
        parents { localhost:1099/hub.center }
        distribution ConditionalDiscrete { parent-cardinalities { 2 } cardinality 2 probabilities { 0.75 0.25 0.2 0.8 } }
    }
}
"#;

struct Star {
    transport: Arc<LoopbackTransport>,
    near: Arc<Context>,
    _far: Arc<Context>,
    hub: Arc<BeliefNetwork>,
    leaf: Arc<BeliefNetwork>,
}

fn star() -> Star {
    let transport = LoopbackTransport::new();
    let near = Context::with_transport(EngineConfig::default(), transport.clone()).unwrap();
    let far =
        Context::with_transport(EngineConfig::at("localhost", 2000), transport.clone()).unwrap();
    let hub = near.parse_network(HUB).unwrap();
    let leaf = far.parse_network(LEAF).unwrap();
    Star {
        transport,
        near,
        _far: far,
        hub,
        leaf,
    }
}

#[test]
fn remote_child_is_registered_on_its_parent() {
    let star = star();
    let center = star.hub.snapshot("center").unwrap();
    let children: Vec<String> = center.children.iter().map(|c| c.key.to_string()).collect();
    assert_eq!(
        children,
        vec![
            "localhost:1099/hub.n1",
            "localhost:1099/hub.n2",
            "localhost:1099/hub.n3",
            "localhost:2000/leaf.far",
        ]
    );
    assert_eq!(
        star.transport.published(),
        vec!["localhost:1099/hub", "localhost:2000/leaf"]
    );

    // P(far = loud) = 0.6 * 0.25 + 0.4 * 0.8
    let far = probabilities(&star.leaf.get_posterior("far").unwrap());
    assert!((far[1] - 0.47).abs() < 1e-9, "{far:?}");
}

#[test]
fn evidence_crosses_contexts_in_both_directions() {
    let star = star();
    star.leaf.assign_evidence_state("far", "loud").unwrap();
    // P(on | loud) = 0.4 * 0.8 / 0.47
    let center = probabilities(&star.hub.get_posterior("center").unwrap());
    assert!((center[1] - 0.32 / 0.47).abs() < 1e-9, "{center:?}");

    star.leaf.clear_posterior("far").unwrap();
    star.hub.assign_evidence("center", 1.0).unwrap();
    let far = probabilities(&star.leaf.get_posterior("far").unwrap());
    assert!((far[1] - 0.8).abs() < 1e-9, "{far:?}");
}

#[test]
fn unreachable_child_does_not_stop_invalidation() {
    let star = star();
    for name in ["n1", "n2", "n3"] {
        star.hub.get_posterior(name).unwrap();
        assert!(star.hub.snapshot(name).unwrap().parents[0].message.is_some());
    }
    star.leaf.get_posterior("far").unwrap();
    assert!(star.leaf.snapshot("far").unwrap().parents[0].message.is_some());

    star.transport.sever("localhost:2000/leaf");
    star.hub.assign_evidence("center", 1.0).unwrap();

    for name in ["n1", "n2", "n3"] {
        let snapshot = star.hub.snapshot(name).unwrap();
        assert!(snapshot.parents[0].message.is_none(), "{name} kept a stale message");
        assert!(snapshot.posterior.is_none());
    }
    // the dead child was dropped, the rest still see the evidence
    let center = star.hub.snapshot("center").unwrap();
    assert_eq!(center.children.len(), 3);
    assert!(center.children.iter().all(|c| c.key.network == "localhost:1099/hub"));
    let n3 = probabilities(&star.hub.get_posterior("n3").unwrap());
    assert!((n3[1] - 0.9).abs() < 1e-9);

    // never reached, so its message is the stale one
    assert!(star.leaf.snapshot("far").unwrap().parents[0].message.is_some());
}

#[test]
fn unreachable_parent_falls_back_to_its_prior() {
    let star = star();
    star.hub.assign_evidence("center", 1.0).unwrap();
    let far = probabilities(&star.leaf.get_posterior("far").unwrap());
    assert!((far[1] - 0.8).abs() < 1e-9);

    star.transport.sever("localhost:1099/hub");
    star.leaf.clear_all("far").unwrap();
    // the prior of center was recorded when the reference was resolved
    let far = probabilities(&star.leaf.get_posterior("far").unwrap());
    assert!((far[1] - 0.47).abs() < 1e-9, "{far:?}");
    assert!(!star.leaf.snapshot("far").unwrap().parents[0].resolved);
}

const FAR_ROOT: &str = r#"
BeliefNetwork far {
    Variable r {
        type discrete
        distribution Discrete { probabilities { 0.3 0.7 } }
    }
}
"#;

const MIXED_PARENTS: &str = r#"
BeliefNetwork mixed {
    Variable p {
        type discrete
        distribution Discrete { probabilities { 0.5 0.5 } }
    }
    Variable x {
        type discrete
        parents { localhost:2000/far.r p }
        distribution ConditionalDiscrete {
            parent-cardinalities { 2 2 }
            cardinality 2
            probabilities { 0.9 0.1 0.6 0.4 0.5 0.5 0.2 0.8 }
        }
    }
    Variable c {
        type discrete
        parents { x }
        distribution ConditionalDiscrete { parent-cardinalities { 2 } cardinality 2 probabilities { 0.8 0.2 0.3 0.7 } }
    }
}
"#;

#[test]
fn live_parent_still_invalidates_after_its_sibling_is_unlinked() {
    let transport = LoopbackTransport::new();
    let far = Context::with_transport(EngineConfig::at("localhost", 2000), transport.clone())
        .unwrap();
    far.parse_network(FAR_ROOT).unwrap();
    let near = Context::with_transport(EngineConfig::default(), transport.clone()).unwrap();
    let mixed = near.parse_network(MIXED_PARENTS).unwrap();

    transport.sever("localhost:2000/far");
    // P(x = 1) = 0.53 from the recorded prior of r, P(c = 1) = 0.47 * 0.2 + 0.53 * 0.7
    let c = probabilities(&mixed.get_posterior("c").unwrap());
    assert!((c[1] - 0.465).abs() < 1e-9, "{c:?}");
    let x = mixed.snapshot("x").unwrap();
    assert!(!x.parents[0].resolved);
    assert!(x.parents[1].message.is_some(), "message from p was not recorded");

    mixed.assign_evidence("p", 1.0).unwrap();
    assert!(mixed.snapshot("c").unwrap().posterior.is_none());
    // P(x = 1 | p = 1) = 0.3 * 0.4 + 0.7 * 0.8
    let c = probabilities(&mixed.get_posterior("c").unwrap());
    assert!((c[1] - (0.32 * 0.2 + 0.68 * 0.7)).abs() < 1e-9, "{c:?}");
}

#[test]
fn reparsed_parent_keeps_its_remote_children() {
    let star = star();
    let far = probabilities(&star.leaf.get_posterior("far").unwrap());
    assert!((far[1] - 0.47).abs() < 1e-9);

    star.hub.parse_string(&star.hub.format_string().unwrap()).unwrap();
    let center = star.hub.snapshot("center").unwrap();
    assert_eq!(center.children.len(), 4);
    assert!(center
        .children
        .iter()
        .any(|c| c.key.to_string() == "localhost:2000/leaf.far"));
    // the message far held came from the replaced variable
    assert!(star.leaf.snapshot("far").unwrap().parents[0].message.is_none());

    star.hub.assign_evidence("center", 1.0).unwrap();
    let far = probabilities(&star.leaf.get_posterior("far").unwrap());
    assert!((far[1] - 0.8).abs() < 1e-9, "{far:?}");
}

#[test]
fn peers_reconnect_once_then_give_up() {
    let star = star();
    let far_ctx =
        Context::with_transport(EngineConfig::at("otherhost", 3000), star.transport.clone())
            .unwrap();
    let handle = far_ctx.get_reference_by_name("localhost:1099/hub").unwrap();
    assert_eq!(handle.get_fullname().unwrap(), "localhost:1099/hub");
    assert_eq!(
        handle.get_variables().unwrap(),
        vec!["center", "n1", "n2", "n3"]
    );

    let before = star.transport.connect_count();
    star.transport.sever("localhost:1099/hub");
    assert!(matches!(
        handle.get_posterior("center"),
        Err(InferenceError::Transport { .. })
    ));
    // exactly one reconnect attempt under the default policy
    assert_eq!(star.transport.connect_count(), before + 1);

    star.transport.restore("localhost:1099/hub");
    let again = far_ctx.get_reference_by_name("localhost:1099/hub").unwrap();
    assert!(again.ping().is_ok());
}

#[test]
fn peer_status_tracks_failures() {
    let transport = LoopbackTransport::new();
    let near = Context::with_transport(EngineConfig::default(), transport.clone()).unwrap();
    near.parse_network(HUB).unwrap();
    let location = NameInfo::parse("localhost:1099/hub", "unused", 1).unwrap();
    let peer = RemotePeer::connect(
        &location,
        transport.clone(),
        near.config().reconnect.clone(),
    )
    .unwrap();
    assert_eq!(peer.status(), PeerStatus::Connected);
    assert!(peer.last_seen().is_some());

    transport.sever("localhost:1099/hub");
    assert!(peer.health_check().is_err());
    assert_eq!(peer.status(), PeerStatus::Disconnected);

    transport.restore("localhost:1099/hub");
    assert!(peer.health_check().is_ok());
    assert_eq!(peer.status(), PeerStatus::Connected);
}

#[test]
fn unknown_remote_network_fails_resolution() {
    let transport = LoopbackTransport::new();
    let far = Context::with_transport(EngineConfig::at("localhost", 2000), transport).unwrap();
    assert!(matches!(
        far.parse_network(LEAF),
        Err(InferenceError::UnknownParent { .. })
    ));
    assert!(matches!(
        far.get_reference_by_name("localhost:1099/hub"),
        Err(InferenceError::UnknownNetwork(_))
    ));
}

#[test]
fn torn_down_context_is_stale_to_its_peers() {
    let star = star();
    star.hub.get_posterior("center").unwrap();
    star.near.teardown();
    assert!(star.hub.is_stale());
    assert_eq!(star.transport.published(), vec!["localhost:2000/leaf"]);

    star.leaf.clear_all("far").unwrap();
    let far = probabilities(&star.leaf.get_posterior("far").unwrap());
    assert!((far[1] - 0.47).abs() < 1e-9);
}
