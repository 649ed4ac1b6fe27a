use crate::{
    distribution::{DistKind, DistKindSet},
    error::InferenceError,
};
use enumset::enum_set;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// States of a discrete variable, including the flat message.
pub const DISCRETE_FAMILY: DistKindSet = enum_set!(
    DistKind::Discrete | DistKind::DiscreteDelta | DistKind::Noninformative
);
/// Values of a continuous variable, including the flat message.
pub const CONTINUOUS_FAMILY: DistKindSet = enum_set!(
    DistKind::Gaussian | DistKind::GaussianDelta | DistKind::Noninformative
);
pub const DISCRETE_LIKE: DistKindSet = enum_set!(DistKind::Discrete | DistKind::DiscreteDelta);
pub const CONTINUOUS_LIKE: DistKindSet = enum_set!(DistKind::Gaussian | DistKind::GaussianDelta);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KindPattern {
    Any,
    Exact(DistKind),
    OneOf(DistKindSet),
}

impl KindPattern {
    pub fn matches(&self, kind: DistKind) -> bool {
        match self {
            KindPattern::Any => true,
            KindPattern::Exact(k) => *k == kind,
            KindPattern::OneOf(set) => set.contains(kind),
        }
    }
}

impl Display for KindPattern {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            KindPattern::Any => write!(f, "_"),
            KindPattern::Exact(k) => write!(f, "{k}"),
            KindPattern::OneOf(set) => {
                let names: Vec<String> = set.iter().map(|k| k.to_string()).collect();
                write!(f, "{{{}}}", names.join("|"))
            }
        }
    }
}

/// One positional constraint: `count` occurrences of a kind, or at least `count` if variadic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignatureSlot {
    pub pattern: KindPattern,
    pub count: usize,
    pub variadic: bool,
}

impl SignatureSlot {
    pub fn one(pattern: KindPattern) -> Self {
        SignatureSlot {
            pattern,
            count: 1,
            variadic: false,
        }
    }

    pub fn rest(pattern: KindPattern, min_count: usize) -> Self {
        SignatureSlot {
            pattern,
            count: min_count,
            variadic: true,
        }
    }
}

/// Ordered constraints over the runtime kinds of a strategy's arguments. Only the last slot
/// may be variadic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeSignature(Vec<SignatureSlot>);

impl TypeSignature {
    pub fn new(slots: Vec<SignatureSlot>) -> Result<Self, InferenceError> {
        if slots.is_empty() {
            return Err(InferenceError::InvalidArgument(
                "type signature needs at least one slot".to_string(),
            ));
        }
        let last = slots.len() - 1;
        if let Some(pos) = slots.iter().position(|s| s.variadic) {
            if pos != last {
                return Err(InferenceError::InvalidArgument(format!(
                    "only the last signature slot may be variadic (slot {pos} of {})",
                    slots.len()
                )));
            }
        }
        if slots.iter().any(|s| !s.variadic && s.count == 0) {
            return Err(InferenceError::InvalidArgument(
                "fixed signature slots must match at least one argument".to_string(),
            ));
        }
        Ok(TypeSignature(slots))
    }

    pub fn slots(&self) -> &[SignatureSlot] {
        &self.0
    }

    pub fn matches(&self, kinds: &[DistKind]) -> bool {
        let mut rest = kinds;
        for slot in &self.0 {
            if slot.variadic {
                return rest.len() >= slot.count && rest.iter().all(|k| slot.pattern.matches(*k));
            }
            if rest.len() < slot.count {
                return false;
            }
            let (head, tail) = rest.split_at(slot.count);
            if !head.iter().all(|k| slot.pattern.matches(*k)) {
                return false;
            }
            rest = tail;
        }
        rest.is_empty()
    }
}

impl Display for TypeSignature {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|slot| match (slot.variadic, slot.count) {
                (true, 0) => format!("{}*", slot.pattern),
                (true, 1) => format!("{}+", slot.pattern),
                (true, n) => format!("{}{{{n},}}", slot.pattern),
                (false, 1) => slot.pattern.to_string(),
                (false, n) => format!("{}{{{n}}}", slot.pattern),
            })
            .collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// Render the runtime kinds of a call, for error messages.
pub fn describe_kinds(kinds: &[DistKind]) -> String {
    let names: Vec<String> = kinds.iter().map(|k| k.to_string()).collect();
    format!("({})", names.join(", "))
}
