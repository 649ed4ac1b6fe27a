//! Synchronous sweeps for networks with cycles.
use super::{
    base::{BeliefNetwork, NetworkKind},
    variable::Variable,
};
use crate::{
    config::LoopyConfig,
    distribution::{Discrete, Distribution},
    error::InferenceError,
    nameinfo::VariableKey,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PropagationReport {
    pub iterations: usize,
    pub converged: bool,
    /// Largest posterior change in the final sweep.
    pub max_change: f64,
}

#[derive(Clone, Copy)]
enum Direction {
    FromParent,
    FromChild,
}

impl BeliefNetwork {
    /// Reset every received message to `Noninformative` and drop cached aggregates.
    pub fn initialize_messages(&self) -> Result<(), InferenceError> {
        self.require_loopy()?;
        let _gate = self.update_gate.write();
        self.check_stale()?;
        for variable in self.variables() {
            let mut state = variable.lock();
            for parent in state.parents.iter_mut() {
                parent.message = Some(if parent.target.is_unresolved() {
                    parent.prior.clone().unwrap_or(Distribution::Noninformative)
                } else {
                    Distribution::Noninformative
                });
            }
            for child in state.children.iter_mut() {
                child.message = Some(Distribution::Noninformative);
            }
            state.clear_aggregates();
        }
        tracing::debug!("[BeliefNetwork::initialize_messages] {}", self.fullname());
        Ok(())
    }

    /// Sweep message updates until posteriors move less than the tolerance.
    ///
    /// Each sweep recomputes every incoming message of every variable, parents first where
    /// the local graph permits, then compares all posteriors with the previous sweep.
    #[tracing::instrument(skip(self))]
    pub fn propagate(&self, config: &LoopyConfig) -> Result<PropagationReport, InferenceError> {
        self.require_loopy()?;
        config.validate()?;
        let _gate = self.update_gate.write();
        self.check_stale()?;

        let order = self.sweep_order();
        let mut previous: HashMap<VariableKey, Distribution> = HashMap::new();
        let mut report = PropagationReport {
            iterations: 0,
            converged: false,
            max_change: f64::INFINITY,
        };
        for iteration in 1..=config.max_iterations {
            for variable in &order {
                variable.lock().clear_aggregates();
            }
            for variable in &order {
                self.refresh_incoming(variable, config.damping)?;
            }

            let mut max_change: f64 = 0.0;
            for variable in &order {
                let posterior = self.compute_posterior(variable)?;
                let change = previous
                    .get(variable.key())
                    .map_or(f64::INFINITY, |old| old.distance(&posterior));
                max_change = max_change.max(change);
                previous.insert(variable.key().clone(), posterior);
            }
            report = PropagationReport {
                iterations: iteration,
                converged: max_change < config.convergence_tolerance,
                max_change,
            };
            tracing::debug!(
                "[BeliefNetwork::propagate] {} sweep {} max change {:e}",
                self.fullname(),
                iteration,
                max_change
            );
            if report.converged {
                break;
            }
        }
        if !report.converged {
            tracing::warn!(
                "[BeliefNetwork::propagate] {} did not converge in {} sweeps (max change {:e})",
                self.fullname(),
                report.iterations,
                report.max_change
            );
        }
        Ok(report)
    }

    fn require_loopy(&self) -> Result<(), InferenceError> {
        if self.kind() != NetworkKind::Loopy {
            return Err(InferenceError::InvalidArgument(format!(
                "{} is not a loopy network",
                self.fullname()
            )));
        }
        Ok(())
    }

    /// Pull fresh messages over every resolved edge of `variable`.
    fn refresh_incoming(&self, variable: &Variable, damping: f64) -> Result<(), InferenceError> {
        let (parents, children) = {
            let state = variable.lock();
            (state.parents.clone(), state.children.clone())
        };
        for parent in parents.iter().filter(|p| !p.target.is_unresolved()) {
            match self.call_link(&parent.target, |h| {
                h.compute_pi_message(&parent.key.variable, variable.key())
            }) {
                Ok(message) => self.store_damped(
                    variable,
                    &parent.key,
                    Direction::FromParent,
                    message,
                    damping,
                ),
                Err(e) if e.is_link_failure() => self.unlink_parent(variable, &parent.key),
                Err(e) => return Err(e),
            }
        }
        for child in children.iter().filter(|c| !c.target.is_unresolved()) {
            if child.target.is_foreign() && !self.accept_remote_child_evidence() {
                continue;
            }
            match self.call_link(&child.target, |h| {
                h.compute_lambda_message(variable.key(), &child.key.variable)
            }) {
                Ok(message) => {
                    self.store_damped(variable, &child.key, Direction::FromChild, message, damping)
                }
                Err(e) if e.is_link_failure() => self.detach_child(variable, &child.key),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn store_damped(
        &self,
        variable: &Variable,
        from: &VariableKey,
        direction: Direction,
        message: Distribution,
        damping: f64,
    ) {
        let mut state = variable.lock();
        let index = match direction {
            Direction::FromParent => state.parent_index(from),
            Direction::FromChild => state.child_index(from),
        };
        if let Some(index) = index {
            let slot = match direction {
                Direction::FromParent => &mut state.parents[index].message,
                Direction::FromChild => &mut state.children[index].message,
            };
            let damped = damp(slot.as_ref(), message, damping);
            *slot = Some(damped);
        }
        state.clear_aggregates();
    }
}

/// `(1 - damping) * new + damping * old` for discrete messages of equal size.
fn damp(old: Option<&Distribution>, new: Distribution, damping: f64) -> Distribution {
    if let (Some(Distribution::Discrete(old)), Distribution::Discrete(fresh)) = (old, &new) {
        if damping > 0.0 && old.cardinality() == fresh.cardinality() {
            let mixed = old
                .probabilities()
                .iter()
                .zip(fresh.probabilities())
                .map(|(o, n)| (1.0 - damping) * n + damping * o)
                .collect();
            if let Ok(mixed) = Discrete::new(mixed) {
                return Distribution::Discrete(mixed);
            }
        }
    }
    new
}
