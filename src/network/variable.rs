use super::{peer::LinkTarget, PropagationToken};
use crate::{
    distribution::{DiscreteDelta, Distribution},
    error::InferenceError,
    nameinfo::VariableKey,
};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    thread::{self, ThreadId},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VariableType {
    Discrete {
        states: Option<Vec<String>>,
    },
    Continuous,
    #[default]
    Unknown,
}

impl VariableType {
    pub fn is_discrete(&self) -> bool {
        matches!(self, VariableType::Discrete { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ParentLink {
    /// Name as written in the network description.
    pub declared: String,
    pub key: VariableKey,
    pub target: LinkTarget,
    pub message: Option<Distribution>,
    /// Prior of a foreign parent, fetched when the reference was resolved.
    pub prior: Option<Distribution>,
}

#[derive(Debug, Clone)]
pub struct ChildLink {
    pub key: VariableKey,
    pub target: LinkTarget,
    pub message: Option<Distribution>,
}

/// A slot invalidation already handled under the current propagation token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Visit {
    PiFrom(VariableKey),
    LambdaFrom(VariableKey),
}

#[derive(Debug, Default)]
pub(crate) struct VariableState {
    pub var_type: VariableType,
    pub distribution: Option<Distribution>,
    pub parents: Vec<ParentLink>,
    pub children: Vec<ChildLink>,
    pub pi: Option<Distribution>,
    pub lambda: Option<Distribution>,
    pub posterior: Option<Distribution>,
    pub generation: u64,
    pending: HashSet<(VariableKey, ThreadId)>,
    visited: Option<(PropagationToken, HashSet<Visit>)>,
}

impl VariableState {
    pub fn is_evidence(&self) -> bool {
        self.posterior.as_ref().is_some_and(Distribution::is_delta)
    }

    pub fn parent_index(&self, key: &VariableKey) -> Option<usize> {
        self.parents.iter().position(|p| p.key == *key)
    }

    pub fn child_index(&self, key: &VariableKey) -> Option<usize> {
        self.children.iter().position(|c| c.key == *key)
    }

    /// Drop every cached aggregate except on evidence, where all three are the indicator.
    pub fn clear_aggregates(&mut self) {
        if !self.is_evidence() {
            self.pi = None;
            self.lambda = None;
            self.posterior = None;
        }
        self.generation += 1;
    }

    /// Record `visit` under `token`; false if it was already recorded.
    pub fn first_visit(&mut self, token: &PropagationToken, visit: Visit) -> bool {
        match &mut self.visited {
            Some((current, seen)) if current == token => seen.insert(visit),
            _ => {
                self.visited = Some((token.clone(), HashSet::from([visit])));
                true
            }
        }
    }

    /// Number of states implied by the declared type or the distribution.
    pub fn cardinality(&self) -> Option<usize> {
        match &self.var_type {
            VariableType::Discrete {
                states: Some(states),
            } => Some(states.len()),
            _ => self.distribution.as_ref().and_then(Distribution::cardinality),
        }
    }
}

/// Marks a message computation in flight; removed when dropped.
pub(crate) struct PendingGuard<'a> {
    variable: &'a Variable,
    entry: (VariableKey, ThreadId),
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.variable.state.lock().pending.remove(&self.entry);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSnapshot {
    pub key: VariableKey,
    pub resolved: bool,
    pub message: Option<Distribution>,
}

/// Point-in-time copy of a variable's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSnapshot {
    pub key: VariableKey,
    pub var_type: VariableType,
    pub distribution: Option<Distribution>,
    pub pi: Option<Distribution>,
    pub lambda: Option<Distribution>,
    pub posterior: Option<Distribution>,
    pub parents: Vec<EdgeSnapshot>,
    pub children: Vec<EdgeSnapshot>,
    pub generation: u64,
}

impl VariableSnapshot {
    pub fn is_evidence(&self) -> bool {
        self.posterior.as_ref().is_some_and(Distribution::is_delta)
    }
}

#[derive(Debug)]
pub struct Variable {
    key: VariableKey,
    state: Mutex<VariableState>,
}

impl Variable {
    pub(crate) fn new(
        key: VariableKey,
        var_type: VariableType,
        distribution: Option<Distribution>,
        parents: Vec<ParentLink>,
    ) -> Self {
        Variable {
            key,
            state: Mutex::new(VariableState {
                var_type,
                distribution,
                parents,
                ..Default::default()
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.key.variable
    }

    pub fn key(&self) -> &VariableKey {
        &self.key
    }

    /// `host:port/network.variable`
    pub fn fullname(&self) -> String {
        self.key.to_string()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, VariableState> {
        self.state.lock()
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn is_evidence(&self) -> bool {
        self.state.lock().is_evidence()
    }

    pub fn snapshot(&self) -> VariableSnapshot {
        let state = self.state.lock();
        VariableSnapshot {
            key: self.key.clone(),
            var_type: state.var_type.clone(),
            distribution: state.distribution.clone(),
            pi: state.pi.clone(),
            lambda: state.lambda.clone(),
            posterior: state.posterior.clone(),
            parents: state
                .parents
                .iter()
                .map(|p| EdgeSnapshot {
                    key: p.key.clone(),
                    resolved: !p.target.is_unresolved(),
                    message: p.message.clone(),
                })
                .collect(),
            children: state
                .children
                .iter()
                .map(|c| EdgeSnapshot {
                    key: c.key.clone(),
                    resolved: !c.target.is_unresolved(),
                    message: c.message.clone(),
                })
                .collect(),
            generation: state.generation,
        }
    }

    /// Apply `update` only if no invalidation happened since `generation` was read.
    pub(crate) fn store_if_current(
        &self,
        generation: u64,
        update: impl FnOnce(&mut VariableState),
    ) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            tracing::debug!(
                "[Variable::store_if_current] {} moved from generation {} to {}, discarding memo",
                self.key,
                generation,
                state.generation
            );
            return false;
        }
        update(&mut state);
        true
    }

    /// Register a message request for `recipient` on this thread; `None` if one is in flight.
    pub(crate) fn enter_pending(&self, recipient: &VariableKey) -> Option<PendingGuard<'_>> {
        let entry = (recipient.clone(), thread::current().id());
        let mut state = self.state.lock();
        if !state.pending.insert(entry.clone()) {
            return None;
        }
        Some(PendingGuard {
            variable: self,
            entry,
        })
    }

    /// Index of the named state of a discrete variable.
    pub fn numeric_value(&self, state_name: &str) -> Result<f64, InferenceError> {
        let state = self.state.lock();
        match &state.var_type {
            VariableType::Discrete {
                states: Some(states),
            } => states
                .iter()
                .position(|s| s == state_name)
                .map(|i| i as f64)
                .ok_or_else(|| {
                    InferenceError::InvalidArgument(format!(
                        "{} has no state named '{state_name}'",
                        self.key
                    ))
                }),
            _ => Err(InferenceError::InvalidArgument(format!(
                "{} has no named states",
                self.key
            ))),
        }
    }

    /// Indicator distribution representing evidence `value` for this variable.
    pub(crate) fn evidence_for(&self, value: f64) -> Result<Distribution, InferenceError> {
        if !value.is_finite() {
            return Err(InferenceError::InvalidArgument(format!(
                "evidence for {} must be finite, got {value}",
                self.key
            )));
        }
        let state = self.state.lock();
        let discrete = state.var_type.is_discrete()
            || (state.var_type == VariableType::Unknown && state.cardinality().is_some());
        if !discrete {
            return Ok(Distribution::GaussianDelta(value));
        }
        let cardinality = state.cardinality().ok_or_else(|| {
            InferenceError::InvalidArgument(format!(
                "{} is discrete but its number of states is unknown",
                self.key
            ))
        })?;
        if value.fract() != 0.0 || value < 0.0 {
            return Err(InferenceError::InvalidArgument(format!(
                "evidence for discrete {} must be a state index, got {value}",
                self.key
            )));
        }
        Ok(Distribution::DiscreteDelta(DiscreteDelta::new(
            cardinality,
            value as usize,
        )?))
    }
}
