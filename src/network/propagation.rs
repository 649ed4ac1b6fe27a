//! Evidence changes and push invalidation.
//!
//! A change to a variable clears exactly the cached messages that depended on it, wave by
//! wave, and nothing is recomputed until someone asks. Neighbors that cannot be reached while
//! a wave fans out lose their edge; the wave continues without them.
use super::{
    base::BeliefNetwork,
    peer::LinkTarget,
    variable::{ChildLink, Variable, Visit},
    PropagationToken,
};
use crate::{
    distribution::Distribution,
    error::InferenceError,
    event::{EventSlot, SlotChange},
    nameinfo::VariableKey,
};

enum Invalidation {
    Ignored,
    EvidenceOnly,
    Cleared { notify_parents: bool },
}

impl BeliefNetwork {
    /// Clamp `variable` to `value`: a state index for discrete variables.
    ///
    /// Assigning the evidence a variable already holds is a no-op.
    #[tracing::instrument(skip(self))]
    pub fn assign_evidence(&self, variable: &str, value: f64) -> Result<(), InferenceError> {
        let _gate = self.update_gate.write();
        self.check_stale()?;
        let variable = self.variable(variable)?;
        let evidence = variable.evidence_for(value)?;
        {
            let mut state = variable.lock();
            if state.posterior.as_ref() == Some(&evidence) {
                tracing::debug!(
                    "[BeliefNetwork::assign_evidence] {} already holds {}",
                    variable.key(),
                    evidence
                );
                return Ok(());
            }
            state.pi = Some(evidence.clone());
            state.lambda = Some(evidence.clone());
            state.posterior = Some(evidence.clone());
            state.generation += 1;
        }
        tracing::info!(
            "[BeliefNetwork::assign_evidence] {} := {}",
            variable.key(),
            evidence
        );
        self.emit(&variable, EventSlot::Evidence, SlotChange::Computed);
        let token = self.next_token()?;
        self.notify_all_invalid_lambda_message(&variable, &token, None);
        self.notify_all_invalid_pi_message(&variable, &token, None);
        Ok(())
    }

    /// Evidence by state name for discrete variables with named states.
    pub fn assign_evidence_state(&self, variable: &str, state: &str) -> Result<(), InferenceError> {
        let value = self.variable(variable)?.numeric_value(state)?;
        self.assign_evidence(variable, value)
    }

    /// Drop the cached pi, lambda and posterior; retract evidence if there was any.
    #[tracing::instrument(skip(self))]
    pub fn clear_posterior(&self, variable: &str) -> Result<(), InferenceError> {
        let _gate = self.update_gate.write();
        self.check_stale()?;
        let variable = self.variable(variable)?;
        let was_evidence = {
            let mut state = variable.lock();
            let was_evidence = state.is_evidence();
            state.pi = None;
            state.lambda = None;
            state.posterior = None;
            state.generation += 1;
            was_evidence
        };
        self.emit(&variable, EventSlot::Posterior, SlotChange::Invalidated);
        if was_evidence {
            tracing::info!(
                "[BeliefNetwork::clear_posterior] retracted evidence on {}",
                variable.key()
            );
            let token = self.next_token()?;
            self.notify_all_invalid_lambda_message(&variable, &token, None);
            self.notify_all_invalid_pi_message(&variable, &token, None);
        }
        Ok(())
    }

    /// [`BeliefNetwork::clear_posterior`] plus every received message.
    #[tracing::instrument(skip(self))]
    pub fn clear_all(&self, variable: &str) -> Result<(), InferenceError> {
        let _gate = self.update_gate.write();
        self.check_stale()?;
        let variable = self.variable(variable)?;
        let was_evidence = {
            let mut state = variable.lock();
            let was_evidence = state.is_evidence();
            state.pi = None;
            state.lambda = None;
            state.posterior = None;
            for parent in state.parents.iter_mut() {
                parent.message = None;
            }
            for child in state.children.iter_mut() {
                child.message = None;
            }
            state.generation += 1;
            was_evidence
        };
        self.emit(&variable, EventSlot::Posterior, SlotChange::Invalidated);
        if was_evidence {
            let token = self.next_token()?;
            self.notify_all_invalid_lambda_message(&variable, &token, None);
            self.notify_all_invalid_pi_message(&variable, &token, None);
        }
        Ok(())
    }

    /// Retract the evidence on every variable of this network. Returns how many were retracted.
    #[tracing::instrument(skip(self))]
    pub fn clear_all_evidence(&self) -> Result<usize, InferenceError> {
        self.check_stale()?;
        let evidence: Vec<String> = self
            .variables()
            .iter()
            .filter(|v| v.is_evidence())
            .map(|v| v.name().to_string())
            .collect();
        for name in &evidence {
            self.clear_posterior(name)?;
        }
        tracing::info!(
            "[BeliefNetwork::clear_all_evidence] retracted {} in {}",
            evidence.len(),
            self.fullname()
        );
        Ok(evidence.len())
    }

    /// Replace the distribution of `variable` and invalidate what depended on it.
    #[tracing::instrument(skip(self))]
    pub fn set_distribution(
        &self,
        variable: &str,
        distribution: Distribution,
    ) -> Result<(), InferenceError> {
        let _gate = self.update_gate.write();
        self.check_stale()?;
        let variable = self.variable(variable)?;
        let is_evidence = {
            let mut state = variable.lock();
            let parents = state.parents.len();
            let arity_ok = if distribution.is_conditional() {
                distribution.parent_count() == parents
            } else {
                parents == 0
            };
            if !arity_ok {
                return Err(InferenceError::InvalidArgument(format!(
                    "{} has {parents} parents; {} does not fit",
                    variable.key(),
                    distribution.kind()
                )));
            }
            state.distribution = Some(distribution);
            state.clear_aggregates();
            state.is_evidence()
        };
        self.emit(&variable, EventSlot::Posterior, SlotChange::Invalidated);
        let token = self.next_token()?;
        self.notify_all_invalid_lambda_message(&variable, &token, None);
        if !is_evidence {
            self.notify_all_invalid_pi_message(&variable, &token, None);
        }
        Ok(())
    }

    /// The pi message from `parent` into `child` is out of date.
    pub fn invalid_pi_message_notification(
        &self,
        child: &str,
        parent: &VariableKey,
        token: &PropagationToken,
    ) -> Result<(), InferenceError> {
        self.check_stale()?;
        let variable = self.variable(child)?;
        let outcome = {
            let mut state = variable.lock();
            let index = state.parent_index(parent).ok_or_else(|| {
                InferenceError::InvalidArgument(format!(
                    "{parent} is not a parent of {}",
                    variable.key()
                ))
            })?;
            if !state.first_visit(token, Visit::PiFrom(parent.clone())) {
                Invalidation::Ignored
            } else {
                // in-flight computations must not store results built on the old message
                state.generation += 1;
                if state.parents[index].message.take().is_none() {
                    Invalidation::Ignored
                } else if state.is_evidence() {
                    Invalidation::EvidenceOnly
                } else {
                    let notify_parents = state
                        .lambda
                        .as_ref()
                        .map_or(true, Distribution::is_informative);
                    state.pi = None;
                    state.posterior = None;
                    Invalidation::Cleared { notify_parents }
                }
            }
        };
        match outcome {
            Invalidation::Ignored => {}
            Invalidation::EvidenceOnly => {
                self.notify_all_invalid_lambda_message(&variable, token, Some(parent));
            }
            Invalidation::Cleared { notify_parents } => {
                self.emit(&variable, EventSlot::Pi, SlotChange::Invalidated);
                self.emit(&variable, EventSlot::Posterior, SlotChange::Invalidated);
                if notify_parents {
                    self.notify_all_invalid_lambda_message(&variable, token, Some(parent));
                }
                self.notify_all_invalid_pi_message(&variable, token, None);
            }
        }
        Ok(())
    }

    /// The lambda message from `child` into `parent` is out of date.
    pub fn invalid_lambda_message_notification(
        &self,
        parent: &str,
        child: &VariableKey,
        token: &PropagationToken,
    ) -> Result<(), InferenceError> {
        self.check_stale()?;
        let variable = self.variable(parent)?;
        let outcome = {
            let mut state = variable.lock();
            let index = state.child_index(child).ok_or_else(|| {
                InferenceError::InvalidArgument(format!(
                    "{child} is not a child of {}",
                    variable.key()
                ))
            })?;
            if !state.first_visit(token, Visit::LambdaFrom(child.clone())) {
                Invalidation::Ignored
            } else {
                state.generation += 1;
                if state.children[index].message.take().is_none() {
                    Invalidation::Ignored
                } else if state.is_evidence() {
                    Invalidation::EvidenceOnly
                } else {
                    state.lambda = None;
                    state.posterior = None;
                    Invalidation::Cleared {
                        notify_parents: true,
                    }
                }
            }
        };
        if let Invalidation::Cleared { .. } = outcome {
            self.emit(&variable, EventSlot::Lambda, SlotChange::Invalidated);
            self.emit(&variable, EventSlot::Posterior, SlotChange::Invalidated);
            self.notify_all_invalid_lambda_message(&variable, token, None);
            self.notify_all_invalid_pi_message(&variable, token, Some(child));
        }
        Ok(())
    }

    /// Register `child` under local `parent`; re-registering refreshes the link.
    pub fn add_child(&self, parent: &str, child: &VariableKey) -> Result<(), InferenceError> {
        self.check_stale()?;
        let variable = self.variable(parent)?;
        let target = self.resolve_target(&child.network)?;
        let had_lambda = {
            let mut state = variable.lock();
            match state.child_index(child) {
                Some(index) => {
                    state.children[index].target = target;
                    state.children[index].message = None;
                }
                None => state.children.push(ChildLink {
                    key: child.clone(),
                    target,
                    message: None,
                }),
            }
            let had_lambda = state.lambda.is_some() && !state.is_evidence();
            state.clear_aggregates();
            had_lambda
        };
        tracing::debug!("[BeliefNetwork::add_child] {} -> {}", variable.key(), child);
        if had_lambda {
            let token = self.next_token()?;
            self.notify_all_invalid_lambda_message(&variable, &token, None);
            self.notify_all_invalid_pi_message(&variable, &token, Some(child));
        }
        Ok(())
    }

    pub fn remove_child(&self, parent: &str, child: &VariableKey) -> Result<(), InferenceError> {
        self.check_stale()?;
        let variable = self.variable(parent)?;
        if variable.lock().child_index(child).is_none() {
            return Err(InferenceError::InvalidArgument(format!(
                "{child} is not a child of {}",
                variable.key()
            )));
        }
        self.detach_child(&variable, child);
        Ok(())
    }

    /// Remove the edge to `child`; if its message carried information, lambda is invalid.
    pub(super) fn detach_child(&self, variable: &Variable, child: &VariableKey) {
        let informative = {
            let mut state = variable.lock();
            let Some(index) = state.child_index(child) else {
                return;
            };
            let removed = state.children.remove(index);
            let informative = removed
                .message
                .as_ref()
                .map_or(true, Distribution::is_informative);
            if informative && !state.is_evidence() {
                state.lambda = None;
                state.posterior = None;
            }
            state.generation += 1;
            informative && !state.is_evidence()
        };
        tracing::info!(
            "[BeliefNetwork::detach_child] {} no longer has child {}",
            variable.key(),
            child
        );
        if !informative {
            return;
        }
        self.emit(variable, EventSlot::Lambda, SlotChange::Invalidated);
        match self.next_token() {
            Ok(token) => {
                self.notify_all_invalid_lambda_message(variable, &token, None);
                self.notify_all_invalid_pi_message(variable, &token, None);
            }
            Err(e) => tracing::warn!(
                "[BeliefNetwork::detach_child] cannot propagate removal from {}: {}",
                variable.key(),
                e
            ),
        }
    }

    /// Sever the edge to `parent` and fall back to its recorded prior.
    ///
    /// The slot is kept so the conditional distribution's arity still matches.
    pub(super) fn unlink_parent(&self, variable: &Variable, parent: &VariableKey) {
        let mut state = variable.lock();
        let Some(index) = state.parent_index(parent) else {
            return;
        };
        let slot = &mut state.parents[index];
        slot.target = LinkTarget::Unresolved;
        slot.message = slot.prior.clone().or(Some(Distribution::Noninformative));
        state.clear_aggregates();
        tracing::info!(
            "[BeliefNetwork::unlink_parent] {} lost parent {}, using its prior",
            variable.key(),
            parent
        );
    }

    /// Tell every child (but `except`) that the pi message from `variable` changed.
    pub(super) fn notify_all_invalid_pi_message(
        &self,
        variable: &Variable,
        token: &PropagationToken,
        except: Option<&VariableKey>,
    ) {
        let children: Vec<_> = variable
            .lock()
            .children
            .iter()
            .filter(|c| Some(&c.key) != except && !c.target.is_unresolved())
            .cloned()
            .collect();
        for child in children {
            let result = self.call_link(&child.target, |h| {
                h.invalid_pi_message_notification(&child.key.variable, variable.key(), token)
            });
            match result {
                Ok(()) => {}
                Err(e) if e.is_link_failure() => {
                    tracing::warn!(
                        "[BeliefNetwork::notify_all_invalid_pi_message] child {} unreachable: {}",
                        child.key,
                        e
                    );
                    self.detach_child(variable, &child.key);
                }
                Err(e) => tracing::warn!(
                    "[BeliefNetwork::notify_all_invalid_pi_message] {} -> {}: {}",
                    variable.key(),
                    child.key,
                    e
                ),
            }
        }
    }

    /// Tell every parent (but `except`) that the lambda message from `variable` changed.
    pub(super) fn notify_all_invalid_lambda_message(
        &self,
        variable: &Variable,
        token: &PropagationToken,
        except: Option<&VariableKey>,
    ) {
        let parents: Vec<_> = variable
            .lock()
            .parents
            .iter()
            .filter(|p| Some(&p.key) != except && !p.target.is_unresolved())
            .cloned()
            .collect();
        for parent in parents {
            let result = self.call_link(&parent.target, |h| {
                h.invalid_lambda_message_notification(&parent.key.variable, variable.key(), token)
            });
            match result {
                Ok(()) => {}
                Err(e) if e.is_link_failure() => {
                    tracing::warn!(
                        "[BeliefNetwork::notify_all_invalid_lambda_message] parent {} unreachable: {}",
                        parent.key,
                        e
                    );
                    self.unlink_parent(variable, &parent.key);
                }
                Err(e) => tracing::warn!(
                    "[BeliefNetwork::notify_all_invalid_lambda_message] {} -> {}: {}",
                    variable.key(),
                    parent.key,
                    e
                ),
            }
        }
    }
}
