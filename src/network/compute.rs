//! On-demand computation of pi, lambda, messages and posteriors.
//!
//! Every quantity is memoized on its variable, but a memo is only stored if the variable's
//! generation did not move while it was being computed. A computation that saw the generation
//! move is run again, so what a caller receives is always backed by recorded messages.
use super::{
    base::{BeliefNetwork, NetworkKind},
    peer::LinkTarget,
    variable::{ChildLink, ParentLink, Variable},
};
use crate::{
    distribution::Distribution,
    error::InferenceError,
    event::{EventSlot, SlotChange},
    nameinfo::VariableKey,
    strategy::LambdaMessageInput,
};
use std::collections::BTreeMap;

const MAX_SETTLE_ATTEMPTS: usize = 8;

impl BeliefNetwork {
    /// Posterior of `variable`, computing whatever is missing.
    pub fn get_posterior(&self, variable: &str) -> Result<Distribution, InferenceError> {
        let _gate = self.update_gate.read_recursive();
        self.check_stale()?;
        let variable = self.variable(variable)?;
        self.compute_posterior(&variable)
    }

    /// Posterior of every variable in the network, keyed by variable name.
    pub fn compute_all_posteriors(
        &self,
    ) -> Result<BTreeMap<String, Distribution>, InferenceError> {
        let _gate = self.update_gate.read_recursive();
        self.check_stale()?;
        self.variables()
            .iter()
            .map(|variable| {
                let posterior = self.compute_posterior(variable)?;
                Ok((variable.name().to_string(), posterior))
            })
            .collect()
    }

    /// Marginal of `variable` ignoring all evidence.
    pub fn get_prior(&self, variable: &str) -> Result<Distribution, InferenceError> {
        self.check_stale()?;
        let variable = self.variable(variable)?;
        let Some(_guard) = variable.enter_pending(variable.key()) else {
            return self.on_message_loop(&variable, variable.key());
        };
        let (distribution, parents) = {
            let state = variable.lock();
            (state.distribution.clone(), state.parents.clone())
        };
        let distribution = required(&variable, distribution)?;
        if parents.is_empty() {
            return distribution.unconditional();
        }
        let mut priors = Vec::with_capacity(parents.len());
        for parent in &parents {
            let prior = match &parent.target {
                LinkTarget::Unresolved => substitute_prior(parent),
                target => match self.call_link(target, |h| h.get_prior(&parent.key.variable)) {
                    Ok(prior) => prior,
                    Err(e) if e.is_link_failure() => {
                        tracing::warn!(
                            "[BeliefNetwork::get_prior] parent {} unreachable: {}",
                            parent.key,
                            e
                        );
                        substitute_prior(parent)
                    }
                    Err(e) => return Err(e),
                },
            };
            priors.push(prior);
        }
        self.registry()?.pi(&distribution, &priors)
    }

    /// Information gained about `x` from evidence on `e`: `KL(posterior(x) || prior(x))`.
    pub fn compute_information(&self, x: &str, e: &str) -> Result<f64, InferenceError> {
        let evidence = self.variable(e)?;
        if !evidence.is_evidence() {
            return Err(InferenceError::InvalidArgument(format!(
                "{} is not evidence",
                evidence.key()
            )));
        }
        let posterior = self.get_posterior(x)?;
        let prior = self.get_prior(x)?;
        posterior.kl_divergence(&prior)
    }

    pub(super) fn compute_posterior(
        &self,
        variable: &Variable,
    ) -> Result<Distribution, InferenceError> {
        self.settle(variable, |generation| {
            if let Some(posterior) = variable.lock().posterior.clone() {
                return Ok(posterior);
            }
            let pi = self.compute_pi(variable)?;
            let lambda = self.compute_lambda(variable)?;
            let posterior = self.registry()?.posterior(&pi, &lambda)?;
            if variable.store_if_current(generation, |state| {
                state.posterior = Some(posterior.clone())
            }) {
                self.emit(variable, EventSlot::Posterior, SlotChange::Computed);
            }
            Ok(posterior)
        })
    }

    pub(super) fn compute_pi(&self, variable: &Variable) -> Result<Distribution, InferenceError> {
        self.settle(variable, |generation| {
            let (distribution, parents) = {
                let state = variable.lock();
                if let Some(pi) = &state.pi {
                    return Ok(pi.clone());
                }
                (state.distribution.clone(), state.parents.clone())
            };
            let distribution = required(variable, distribution)?;
            let pi = if parents.is_empty() {
                distribution.unconditional()?
            } else {
                let mut messages = Vec::with_capacity(parents.len());
                for parent in &parents {
                    let message = match &parent.message {
                        Some(message) => message.clone(),
                        None => self.fetch_pi_message(variable, parent, generation)?,
                    };
                    messages.push(message);
                }
                self.registry()?.pi(&distribution, &messages)?
            };
            if variable.store_if_current(generation, |state| state.pi = Some(pi.clone())) {
                self.emit(variable, EventSlot::Pi, SlotChange::Computed);
            }
            Ok(pi)
        })
    }

    pub(super) fn compute_lambda(
        &self,
        variable: &Variable,
    ) -> Result<Distribution, InferenceError> {
        self.settle(variable, |generation| {
            let children = {
                let state = variable.lock();
                if let Some(lambda) = &state.lambda {
                    return Ok(lambda.clone());
                }
                state.children.clone()
            };
            let mut messages = Vec::with_capacity(children.len());
            for child in &children {
                if let Some(message) = self.child_message(variable, child, generation)? {
                    if message.is_informative() {
                        messages.push(message);
                    }
                }
            }
            let lambda = match messages.len() {
                0 => Distribution::Noninformative,
                1 => messages.swap_remove(0),
                _ => self.registry()?.lambda(&messages)?,
            };
            if variable.store_if_current(generation, |state| state.lambda = Some(lambda.clone())) {
                self.emit(variable, EventSlot::Lambda, SlotChange::Computed);
            }
            Ok(lambda)
        })
    }

    /// Pi message from local `parent` to `child`: pi of the parent combined with the lambda
    /// messages of all its other children.
    pub fn compute_pi_message(
        &self,
        parent: &str,
        child: &VariableKey,
    ) -> Result<Distribution, InferenceError> {
        self.check_stale()?;
        let variable = self.variable(parent)?;
        let Some(_guard) = variable.enter_pending(child) else {
            return self.on_message_loop(&variable, child);
        };
        self.settle(&variable, |generation| {
            let pi = self.compute_pi(&variable)?;
            if pi.is_delta() {
                return Ok(pi);
            }
            let children = variable.lock().children.clone();
            if !children.iter().any(|c| c.key == *child) {
                return Err(InferenceError::InvalidArgument(format!(
                    "{child} is not a child of {}",
                    variable.key()
                )));
            }
            let mut messages = Vec::new();
            for other in children.iter().filter(|c| c.key != *child) {
                if let Some(message) = self.child_message(&variable, other, generation)? {
                    if message.is_informative() {
                        messages.push(message);
                    }
                }
            }
            if messages.is_empty() {
                return Ok(pi);
            }
            self.registry()?.pi_message(&pi, &messages)
        })
    }

    /// Lambda message from local `child` to `parent`.
    pub fn compute_lambda_message(
        &self,
        parent: &VariableKey,
        child: &str,
    ) -> Result<Distribution, InferenceError> {
        self.check_stale()?;
        let variable = self.variable(child)?;
        let Some(_guard) = variable.enter_pending(parent) else {
            return self.on_message_loop(&variable, parent);
        };
        self.settle(&variable, |generation| {
            let lambda = self.compute_lambda(&variable)?;
            if !lambda.is_informative() {
                return Ok(Distribution::Noninformative);
            }
            let (distribution, parents) = {
                let state = variable.lock();
                (state.distribution.clone(), state.parents.clone())
            };
            let distribution = required(&variable, distribution)?;
            let index = parents
                .iter()
                .position(|p| p.key == *parent)
                .ok_or_else(|| {
                    InferenceError::InvalidArgument(format!(
                        "{parent} is not a parent of {}",
                        variable.key()
                    ))
                })?;
            let mut pi_messages = Vec::with_capacity(parents.len());
            for (i, other) in parents.iter().enumerate() {
                if i == index {
                    pi_messages.push(None);
                    continue;
                }
                let message = match &other.message {
                    Some(message) => message.clone(),
                    None => self.fetch_pi_message(&variable, other, generation)?,
                };
                pi_messages.push(Some(message));
            }
            self.registry()?.lambda_message(&LambdaMessageInput {
                conditional: &distribution,
                lambda: &lambda,
                parent_index: index,
                pi_messages: &pi_messages,
            })
        })
    }

    /// Run `compute` until `variable`'s generation holds still across it.
    ///
    /// Dropping an unreachable link moves the generation mid-computation, which discards the
    /// memos and message slots written on the way. A second pass records them against the
    /// repaired links so later invalidations can find them.
    fn settle<T>(
        &self,
        variable: &Variable,
        mut compute: impl FnMut(u64) -> Result<T, InferenceError>,
    ) -> Result<T, InferenceError> {
        let mut attempt = 1;
        loop {
            let generation = variable.generation();
            let value = compute(generation)?;
            if variable.generation() == generation {
                return Ok(value);
            }
            if attempt == MAX_SETTLE_ATTEMPTS {
                tracing::warn!(
                    "[BeliefNetwork::settle] {} still changing after {} attempts",
                    variable.key(),
                    attempt
                );
                return Ok(value);
            }
            tracing::debug!(
                "[BeliefNetwork::settle] {} changed during attempt {}, recomputing",
                variable.key(),
                attempt
            );
            attempt += 1;
        }
    }

    /// A re-entrant request for the same message on the same thread.
    pub(super) fn on_message_loop(
        &self,
        variable: &Variable,
        recipient: &VariableKey,
    ) -> Result<Distribution, InferenceError> {
        match self.kind() {
            NetworkKind::Pull => Err(InferenceError::LoopDetected(format!(
                "{} is already computing a message for {recipient}",
                variable.key()
            ))),
            NetworkKind::Loopy => {
                tracing::trace!(
                    "[BeliefNetwork::on_message_loop] {} -> {} re-entered, using noninformative",
                    variable.key(),
                    recipient
                );
                Ok(Distribution::Noninformative)
            }
        }
    }

    /// Request and cache the pi message from `parent`.
    ///
    /// An unreachable parent is unlinked and replaced by its recorded prior.
    pub(super) fn fetch_pi_message(
        &self,
        variable: &Variable,
        parent: &ParentLink,
        generation: u64,
    ) -> Result<Distribution, InferenceError> {
        let message = match &parent.target {
            LinkTarget::Unresolved => substitute_prior(parent),
            target => match self.call_link(target, |h| {
                h.compute_pi_message(&parent.key.variable, variable.key())
            }) {
                Ok(message) => message,
                Err(e) if e.is_link_failure() => {
                    tracing::warn!(
                        "[BeliefNetwork::fetch_pi_message] parent {} of {} unreachable: {}",
                        parent.key,
                        variable.key(),
                        e
                    );
                    self.unlink_parent(variable, &parent.key);
                    return Ok(substitute_prior(parent));
                }
                Err(e) => return Err(e),
            },
        };
        variable.store_if_current(generation, |state| {
            if let Some(index) = state.parent_index(&parent.key) {
                state.parents[index].message = Some(message.clone());
            }
        });
        Ok(message)
    }

    /// Cached or freshly requested lambda message from `child`; `None` if the child is gone.
    fn child_message(
        &self,
        variable: &Variable,
        child: &ChildLink,
        generation: u64,
    ) -> Result<Option<Distribution>, InferenceError> {
        if child.target.is_foreign() && !self.accept_remote_child_evidence() {
            return Ok(Some(Distribution::Noninformative));
        }
        if let Some(message) = &child.message {
            return Ok(Some(message.clone()));
        }
        if child.target.is_unresolved() {
            return Ok(None);
        }
        let message = match self.call_link(&child.target, |h| {
            h.compute_lambda_message(variable.key(), &child.key.variable)
        }) {
            Ok(message) => message,
            Err(e) if e.is_link_failure() => {
                tracing::warn!(
                    "[BeliefNetwork::child_message] dropping unreachable child {} of {}: {}",
                    child.key,
                    variable.key(),
                    e
                );
                self.detach_child(variable, &child.key);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        variable.store_if_current(generation, |state| {
            if let Some(index) = state.child_index(&child.key) {
                state.children[index].message = Some(message.clone());
            }
        });
        Ok(Some(message))
    }
}

fn required(
    variable: &Variable,
    distribution: Option<Distribution>,
) -> Result<Distribution, InferenceError> {
    distribution
        .ok_or_else(|| InferenceError::NotFound(format!("distribution of {}", variable.key())))
}

fn substitute_prior(parent: &ParentLink) -> Distribution {
    parent
        .prior
        .clone()
        .unwrap_or(Distribution::Noninformative)
}
