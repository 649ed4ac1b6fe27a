//! Type-directed strategy dispatch.
//!
//! A strategy is a pure function performing one of the five message-passing computations for
//! a specific combination of distribution kinds. Each is registered under a [`TypeSignature`]
//! and resolved at call time from the runtime kinds of its arguments; resolution succeeds only
//! when exactly one registered signature matches.
//!
//! # Module Organization
//!
//! - [`signature`]: kind patterns and positional signatures
//! - [`builtin`]: strategies for the discrete and linear-gaussian families

pub mod builtin;
mod signature;

#[cfg(test)]
mod tests;

pub use signature::{
    describe_kinds, KindPattern, SignatureSlot, TypeSignature, CONTINUOUS_FAMILY,
    CONTINUOUS_LIKE, DISCRETE_FAMILY, DISCRETE_LIKE,
};

use crate::{
    distribution::{DistKind, Distribution},
    error::InferenceError,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt::{Debug, Display, Formatter},
    sync::Arc,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StrategyRole {
    Pi,
    Lambda,
    PiMessage,
    LambdaMessage,
    Posterior,
}

impl Display for StrategyRole {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let name = match self {
            StrategyRole::Pi => "pi",
            StrategyRole::Lambda => "lambda",
            StrategyRole::PiMessage => "pi-message",
            StrategyRole::LambdaMessage => "lambda-message",
            StrategyRole::Posterior => "posterior",
        };
        write!(f, "{name}")
    }
}

/// Arguments of a lambda-message computation from a child to one of its parents.
#[derive(Debug, Clone, Copy)]
pub struct LambdaMessageInput<'a> {
    /// The child's conditional distribution.
    pub conditional: &'a Distribution,
    pub lambda: &'a Distribution,
    /// Position of the receiving parent among the child's parents.
    pub parent_index: usize,
    /// Pi-messages from every parent; `None` at `parent_index`.
    pub pi_messages: &'a [Option<Distribution>],
}

type Computed = Result<Distribution, InferenceError>;

pub type PiFn = Arc<dyn Fn(&Distribution, &[Distribution]) -> Computed + Send + Sync>;
pub type LambdaFn = Arc<dyn Fn(&[Distribution]) -> Computed + Send + Sync>;
pub type PiMessageFn = Arc<dyn Fn(&Distribution, &[Distribution]) -> Computed + Send + Sync>;
pub type LambdaMessageFn = Arc<dyn Fn(&LambdaMessageInput) -> Computed + Send + Sync>;
pub type PosteriorFn = Arc<dyn Fn(&Distribution, &Distribution) -> Computed + Send + Sync>;

#[derive(Clone)]
pub enum Strategy {
    /// `(conditional, pi-messages) -> pi`
    Pi(PiFn),
    /// `(lambda-messages) -> lambda`
    Lambda(LambdaFn),
    /// `(pi, lambda-messages from other children) -> pi-message`
    PiMessage(PiMessageFn),
    LambdaMessage(LambdaMessageFn),
    /// `(pi, lambda) -> posterior`
    Posterior(PosteriorFn),
}

impl Strategy {
    pub fn role(&self) -> StrategyRole {
        match self {
            Strategy::Pi(_) => StrategyRole::Pi,
            Strategy::Lambda(_) => StrategyRole::Lambda,
            Strategy::PiMessage(_) => StrategyRole::PiMessage,
            Strategy::LambdaMessage(_) => StrategyRole::LambdaMessage,
            Strategy::Posterior(_) => StrategyRole::Posterior,
        }
    }

    pub fn pi<F>(f: F) -> Self
    where
        F: Fn(&Distribution, &[Distribution]) -> Computed + Send + Sync + 'static,
    {
        Strategy::Pi(Arc::new(f))
    }

    pub fn lambda<F>(f: F) -> Self
    where
        F: Fn(&[Distribution]) -> Computed + Send + Sync + 'static,
    {
        Strategy::Lambda(Arc::new(f))
    }

    pub fn pi_message<F>(f: F) -> Self
    where
        F: Fn(&Distribution, &[Distribution]) -> Computed + Send + Sync + 'static,
    {
        Strategy::PiMessage(Arc::new(f))
    }

    pub fn lambda_message<F>(f: F) -> Self
    where
        F: Fn(&LambdaMessageInput) -> Computed + Send + Sync + 'static,
    {
        Strategy::LambdaMessage(Arc::new(f))
    }

    pub fn posterior<F>(f: F) -> Self
    where
        F: Fn(&Distribution, &Distribution) -> Computed + Send + Sync + 'static,
    {
        Strategy::Posterior(Arc::new(f))
    }
}

impl Debug for Strategy {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Strategy::{:?}", self.role())
    }
}

#[derive(Debug)]
pub struct RegisteredStrategy {
    pub name: String,
    pub signature: TypeSignature,
    pub strategy: Strategy,
}

impl RegisteredStrategy {
    pub fn role(&self) -> StrategyRole {
        self.strategy.role()
    }
}

#[derive(Default)]
struct RegistryInner {
    entries: Vec<Arc<RegisteredStrategy>>,
    resolved: HashMap<(StrategyRole, Vec<DistKind>), Arc<RegisteredStrategy>>,
}

/// Thread-safe strategy table.
///
/// Cloning is cheap and shares the table. Successful resolutions are memoized per
/// `(role, kinds)`; registering a strategy clears the memo.
#[derive(Clone, Default)]
pub struct StrategyRegistry(Arc<RwLock<RegistryInner>>);

impl Debug for StrategyRegistry {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let reader = self.0.read();
        f.debug_struct("StrategyRegistry")
            .field("strategies", &reader.entries.len())
            .finish()
    }
}

impl StrategyRegistry {
    /// Empty registry; nothing resolves until strategies are registered.
    pub fn empty() -> Self {
        StrategyRegistry::default()
    }

    /// Registry preloaded with [`builtin`] strategies.
    pub fn create() -> Result<Self, InferenceError> {
        let registry = StrategyRegistry::empty();
        builtin::register_builtins(&registry)?;
        Ok(registry)
    }

    /// Register a strategy.
    ///
    /// Fails with [`InferenceError::DuplicateStrategy`] if a strategy with the same role and an
    /// identical signature already exists. Overlapping but distinct signatures are accepted and
    /// surface as ambiguity at resolution time.
    pub fn register(
        &self,
        name: &str,
        signature: TypeSignature,
        strategy: Strategy,
    ) -> Result<(), InferenceError> {
        let role = strategy.role();
        let mut writer = self.0.write();
        if writer
            .entries
            .iter()
            .any(|e| e.role() == role && e.signature == signature)
        {
            return Err(InferenceError::DuplicateStrategy {
                role: role.to_string(),
                signature: signature.to_string(),
            });
        }
        tracing::debug!(
            "[StrategyRegistry::register] {} strategy '{}' for {}",
            role,
            name,
            signature
        );
        writer.entries.push(Arc::new(RegisteredStrategy {
            name: name.to_string(),
            signature,
            strategy,
        }));
        writer.resolved.clear();
        Ok(())
    }

    /// Select the unique strategy for `role` whose signature matches `kinds`.
    pub fn resolve(
        &self,
        role: StrategyRole,
        kinds: &[DistKind],
    ) -> Result<Arc<RegisteredStrategy>, InferenceError> {
        let key = (role, kinds.to_vec());
        if let Some(hit) = self.0.read().resolved.get(&key) {
            return Ok(hit.clone());
        }

        let mut writer = self.0.write();
        let matches: Vec<Arc<RegisteredStrategy>> = writer
            .entries
            .iter()
            .filter(|e| e.role() == role && e.signature.matches(kinds))
            .cloned()
            .collect();
        match matches.as_slice() {
            [only] => {
                writer.resolved.insert(key, only.clone());
                Ok(only.clone())
            }
            [] => Err(InferenceError::NoStrategyFound {
                role: role.to_string(),
                signature: describe_kinds(kinds),
            }),
            several => {
                let names: Vec<&str> = several.iter().map(|s| s.name.as_str()).collect();
                tracing::warn!(
                    "[StrategyRegistry::resolve] ambiguous {} signature {}: {:?}",
                    role,
                    describe_kinds(kinds),
                    names
                );
                Err(InferenceError::NoStrategyFound {
                    role: role.to_string(),
                    signature: format!(
                        "{} (ambiguous: {})",
                        describe_kinds(kinds),
                        names.join(", ")
                    ),
                })
            }
        }
    }

    pub fn list_strategies(&self) -> Vec<Arc<RegisteredStrategy>> {
        self.0.read().entries.clone()
    }

    pub fn pi(&self, conditional: &Distribution, messages: &[Distribution]) -> Computed {
        let mut kinds = vec![conditional.kind()];
        kinds.extend(messages.iter().map(Distribution::kind));
        match &self.resolve(StrategyRole::Pi, &kinds)?.strategy {
            Strategy::Pi(f) => f(conditional, messages),
            other => Err(role_mismatch(StrategyRole::Pi, other)),
        }
    }

    pub fn lambda(&self, messages: &[Distribution]) -> Computed {
        let kinds: Vec<DistKind> = messages.iter().map(Distribution::kind).collect();
        match &self.resolve(StrategyRole::Lambda, &kinds)?.strategy {
            Strategy::Lambda(f) => f(messages),
            other => Err(role_mismatch(StrategyRole::Lambda, other)),
        }
    }

    pub fn pi_message(&self, pi: &Distribution, messages: &[Distribution]) -> Computed {
        let mut kinds = vec![pi.kind()];
        kinds.extend(messages.iter().map(Distribution::kind));
        match &self.resolve(StrategyRole::PiMessage, &kinds)?.strategy {
            Strategy::PiMessage(f) => f(pi, messages),
            other => Err(role_mismatch(StrategyRole::PiMessage, other)),
        }
    }

    pub fn lambda_message(&self, input: &LambdaMessageInput) -> Computed {
        let mut kinds = vec![input.conditional.kind(), input.lambda.kind()];
        kinds.extend(input.pi_messages.iter().flatten().map(Distribution::kind));
        match &self.resolve(StrategyRole::LambdaMessage, &kinds)?.strategy {
            Strategy::LambdaMessage(f) => f(input),
            other => Err(role_mismatch(StrategyRole::LambdaMessage, other)),
        }
    }

    pub fn posterior(&self, pi: &Distribution, lambda: &Distribution) -> Computed {
        let kinds = [pi.kind(), lambda.kind()];
        match &self.resolve(StrategyRole::Posterior, &kinds)?.strategy {
            Strategy::Posterior(f) => f(pi, lambda),
            other => Err(role_mismatch(StrategyRole::Posterior, other)),
        }
    }
}

fn role_mismatch(expected: StrategyRole, found: &Strategy) -> InferenceError {
    InferenceError::InvalidArgument(format!(
        "registry returned a {} strategy for a {} request",
        found.role(),
        expected
    ))
}
