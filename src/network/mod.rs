//! Belief networks and the pi/lambda message-passing engine.
//!
//! A [`BeliefNetwork`] owns a set of [`Variable`]s. Each variable caches its pi (causal
//! support), lambda (diagnostic support), posterior, and the last message received over every
//! incoming edge. Edges may cross network boundaries: a parent in another network is reached
//! through a [`LinkTarget`], either a sibling network in the same
//! [`crate::context::Context`] or a [`RemotePeer`] over a [`Transport`].
//!
//! Two propagation disciplines share the same state:
//!
//! - [`NetworkKind::Pull`]: posteriors are computed on demand and cached; evidence changes push
//!   invalidations outward. Local cycles are rejected.
//! - [`NetworkKind::Loopy`]: cycles are allowed; re-entrant message requests yield
//!   `Noninformative` and [`BeliefNetwork::propagate`] runs synchronous sweeps to a fixed point.
//!
//! # Module Organization
//!
//! - [`variable`]: per-variable state and snapshots
//! - `base`: construction, lookup and reference resolution
//! - `compute`: on-demand pi, lambda, messages and posteriors
//! - `propagation`: evidence, invalidation and edge maintenance
//! - `loopy`: message initialization and sweeps
//! - [`peer`]: the remote-callable surface, peers and transports

mod base;
mod compute;
mod loopy;
pub mod peer;
mod propagation;
pub mod variable;

#[cfg(test)]
mod tests;

pub use base::{BeliefNetwork, NetworkKind};
pub use loopy::PropagationReport;
pub use peer::{
    LinkTarget, LoopbackTransport, NetworkHandle, PeerStatus, RemotePeer, Transport,
};
pub use variable::{EdgeSnapshot, Variable, VariableSnapshot, VariableType};

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Identifies one invalidation wave.
///
/// A variable handles each incoming slot at most once per token, so a fan-out that reaches the
/// same variable over several paths terminates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropagationToken {
    /// `host:port` of the context that started the wave.
    pub origin: String,
    pub seq: u64,
}

impl Display for PropagationToken {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}#{}", self.origin, self.seq)
    }
}
