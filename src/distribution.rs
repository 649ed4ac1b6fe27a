//! The closed set of distribution kinds the engine reasons over.
//!
//! Every value is immutable once built; constructors validate and normalize. Conditional kinds
//! ([`ConditionalDiscrete`], [`LinearGaussian`]) describe a node given its parents and
//! degenerate into their unconditional forms when the node has no parents.
use crate::error::InferenceError;
use enumset::{EnumSet, EnumSetType};
use serde::{Deserialize, Serialize};
use std::{
    f64::consts::PI,
    fmt::{Display, Formatter},
};

#[derive(Debug, Serialize, Deserialize, PartialOrd, Ord, Hash, EnumSetType)]
#[enumset(serialize_repr = "list")]
pub enum DistKind {
    Discrete,
    DiscreteDelta,
    Gaussian,
    GaussianDelta,
    Noninformative,
    ConditionalDiscrete,
    LinearGaussian,
}

impl Display for DistKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl DistKind {
    pub fn from_class_name(name: &str) -> Option<DistKind> {
        EnumSet::<DistKind>::all()
            .iter()
            .find(|kind| kind.to_string() == name)
    }
}

pub type DistKindSet = EnumSet<DistKind>;

fn check_finite(label: &str, value: f64) -> Result<(), InferenceError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(InferenceError::InvalidArgument(format!(
            "{label} must be finite, got {value}"
        )))
    }
}

fn normalize(label: &str, values: &[f64]) -> Result<Vec<f64>, InferenceError> {
    let mut total = 0.0;
    for value in values {
        check_finite(label, *value)?;
        if *value < 0.0 {
            return Err(InferenceError::InvalidArgument(format!(
                "{label} must be non-negative, got {value}"
            )));
        }
        total += value;
    }
    if total <= 0.0 {
        return Err(InferenceError::Numerical(format!(
            "{label} has no probability mass"
        )));
    }
    // already normalized vectors are kept bit for bit
    if (total - 1.0).abs() <= 1e-12 {
        return Ok(values.to_vec());
    }
    Ok(values.iter().map(|v| v / total).collect())
}

/// Probability (or scale-free likelihood) vector over the states `0..n`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrete {
    probabilities: Vec<f64>,
}

impl Discrete {
    pub fn new(probabilities: Vec<f64>) -> Result<Self, InferenceError> {
        if probabilities.is_empty() {
            return Err(InferenceError::InvalidArgument(
                "discrete distribution needs at least one state".to_string(),
            ));
        }
        Ok(Discrete {
            probabilities: normalize("discrete probability", &probabilities)?,
        })
    }

    pub fn uniform(cardinality: usize) -> Result<Self, InferenceError> {
        Discrete::new(vec![1.0; cardinality])
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    pub fn cardinality(&self) -> usize {
        self.probabilities.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscreteDelta {
    pub support_size: usize,
    pub index: usize,
}

impl DiscreteDelta {
    pub fn new(support_size: usize, index: usize) -> Result<Self, InferenceError> {
        if index >= support_size {
            return Err(InferenceError::InvalidArgument(format!(
                "state index {index} outside support of size {support_size}"
            )));
        }
        Ok(DiscreteDelta {
            support_size,
            index,
        })
    }

    pub fn indicator(&self) -> Vec<f64> {
        let mut values = vec![0.0; self.support_size];
        values[self.index] = 1.0;
        values
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gaussian {
    pub mean: f64,
    pub std_dev: f64,
}

impl Gaussian {
    pub fn new(mean: f64, std_dev: f64) -> Result<Self, InferenceError> {
        check_finite("gaussian mean", mean)?;
        check_finite("gaussian standard deviation", std_dev)?;
        if std_dev <= 0.0 {
            return Err(InferenceError::InvalidArgument(format!(
                "gaussian standard deviation must be > 0, got {std_dev}"
            )));
        }
        Ok(Gaussian { mean, std_dev })
    }

    /// Gaussian with the given variance, or an indicator at `mean` if the variance is zero.
    pub fn from_moments(mean: f64, variance: f64) -> Result<Distribution, InferenceError> {
        check_finite("gaussian mean", mean)?;
        check_finite("gaussian variance", variance)?;
        if variance < 0.0 {
            return Err(InferenceError::Numerical(format!(
                "negative variance {variance}"
            )));
        }
        if variance == 0.0 {
            Ok(Distribution::GaussianDelta(mean))
        } else {
            Ok(Distribution::Gaussian(Gaussian::new(mean, variance.sqrt())?))
        }
    }

    pub fn variance(&self) -> f64 {
        self.std_dev * self.std_dev
    }

    pub fn density(&self, x: f64) -> f64 {
        let z = (x - self.mean) / self.std_dev;
        (-0.5 * z * z).exp() / (self.std_dev * (2.0 * PI).sqrt())
    }
}

/// `P(x | u_1 .. u_n)` over discrete parents.
///
/// Rows are laid out in mixed-radix order of the parent configuration, first parent most
/// significant; each row is a distribution over the node's own states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalDiscrete {
    parent_cardinalities: Vec<usize>,
    cardinality: usize,
    probabilities: Vec<f64>,
}

impl ConditionalDiscrete {
    pub fn new(
        parent_cardinalities: Vec<usize>,
        cardinality: usize,
        probabilities: Vec<f64>,
    ) -> Result<Self, InferenceError> {
        if cardinality == 0 || parent_cardinalities.contains(&0) {
            return Err(InferenceError::InvalidArgument(
                "conditional table dimensions must be non-zero".to_string(),
            ));
        }
        let rows: usize = parent_cardinalities.iter().product();
        if probabilities.len() != rows * cardinality {
            return Err(InferenceError::InvalidArgument(format!(
                "conditional table expects {} entries, got {}",
                rows * cardinality,
                probabilities.len()
            )));
        }
        let mut normalized = Vec::with_capacity(probabilities.len());
        for row in probabilities.chunks(cardinality) {
            normalized.extend(normalize("conditional probability row", row)?);
        }
        Ok(ConditionalDiscrete {
            parent_cardinalities,
            cardinality,
            probabilities: normalized,
        })
    }

    pub fn parent_cardinalities(&self) -> &[usize] {
        &self.parent_cardinalities
    }

    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    pub fn configurations(&self) -> usize {
        self.parent_cardinalities.iter().product()
    }

    pub fn row(&self, configuration: usize) -> &[f64] {
        let start = configuration * self.cardinality;
        &self.probabilities[start..start + self.cardinality]
    }

    /// Parent state indices of a row number.
    pub fn decode(&self, mut configuration: usize) -> Vec<usize> {
        let mut states = vec![0; self.parent_cardinalities.len()];
        for (slot, card) in self.parent_cardinalities.iter().enumerate().rev() {
            states[slot] = configuration % card;
            configuration /= card;
        }
        states
    }
}

/// `x = sum(weights[i] * u_i) + offset + N(0, std_dev^2)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearGaussian {
    weights: Vec<f64>,
    offset: f64,
    std_dev: f64,
}

impl LinearGaussian {
    pub fn new(weights: Vec<f64>, offset: f64, std_dev: f64) -> Result<Self, InferenceError> {
        for w in &weights {
            check_finite("linear gaussian weight", *w)?;
        }
        check_finite("linear gaussian offset", offset)?;
        check_finite("linear gaussian standard deviation", std_dev)?;
        if std_dev < 0.0 {
            return Err(InferenceError::InvalidArgument(format!(
                "linear gaussian standard deviation must be >= 0, got {std_dev}"
            )));
        }
        Ok(LinearGaussian {
            weights,
            offset,
            std_dev,
        })
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn std_dev(&self) -> f64 {
        self.std_dev
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Distribution {
    Discrete(Discrete),
    DiscreteDelta(DiscreteDelta),
    Gaussian(Gaussian),
    GaussianDelta(f64),
    Noninformative,
    ConditionalDiscrete(ConditionalDiscrete),
    LinearGaussian(LinearGaussian),
}

impl Distribution {
    pub fn kind(&self) -> DistKind {
        match self {
            Distribution::Discrete(_) => DistKind::Discrete,
            Distribution::DiscreteDelta(_) => DistKind::DiscreteDelta,
            Distribution::Gaussian(_) => DistKind::Gaussian,
            Distribution::GaussianDelta(_) => DistKind::GaussianDelta,
            Distribution::Noninformative => DistKind::Noninformative,
            Distribution::ConditionalDiscrete(_) => DistKind::ConditionalDiscrete,
            Distribution::LinearGaussian(_) => DistKind::LinearGaussian,
        }
    }

    /// Name used by the textual network format.
    pub fn class_name(&self) -> String {
        self.kind().to_string()
    }

    pub fn is_delta(&self) -> bool {
        matches!(
            self,
            Distribution::DiscreteDelta(_) | Distribution::GaussianDelta(_)
        )
    }

    pub fn is_informative(&self) -> bool {
        !matches!(self, Distribution::Noninformative)
    }

    pub fn is_conditional(&self) -> bool {
        matches!(
            self,
            Distribution::ConditionalDiscrete(_) | Distribution::LinearGaussian(_)
        )
    }

    /// Number of states for discrete kinds; for a conditional table, of the node itself.
    pub fn cardinality(&self) -> Option<usize> {
        match self {
            Distribution::Discrete(d) => Some(d.cardinality()),
            Distribution::DiscreteDelta(d) => Some(d.support_size),
            Distribution::ConditionalDiscrete(c) => Some(c.cardinality()),
            _ => None,
        }
    }

    /// Number of parents a conditional expects; zero for unconditional kinds.
    pub fn parent_count(&self) -> usize {
        match self {
            Distribution::ConditionalDiscrete(c) => c.parent_cardinalities().len(),
            Distribution::LinearGaussian(lg) => lg.weights().len(),
            _ => 0,
        }
    }

    /// Probability vector of length `cardinality`; `Noninformative` becomes uniform.
    pub fn as_probabilities(&self, cardinality: usize) -> Result<Vec<f64>, InferenceError> {
        let values = match self {
            Distribution::Discrete(d) => d.probabilities().to_vec(),
            Distribution::DiscreteDelta(d) => d.indicator(),
            Distribution::Noninformative => vec![1.0 / cardinality as f64; cardinality],
            other => {
                return Err(InferenceError::InvalidArgument(format!(
                    "{} is not a distribution over discrete states",
                    other.kind()
                )))
            }
        };
        if values.len() != cardinality {
            return Err(InferenceError::InvalidArgument(format!(
                "expected {cardinality} states, got {}",
                values.len()
            )));
        }
        Ok(values)
    }

    /// `(mean, variance)` for continuous kinds; `None` for `Noninformative`.
    pub fn as_moments(&self) -> Result<Option<(f64, f64)>, InferenceError> {
        match self {
            Distribution::Gaussian(g) => Ok(Some((g.mean, g.variance()))),
            Distribution::GaussianDelta(v) => Ok(Some((*v, 0.0))),
            Distribution::Noninformative => Ok(None),
            other => Err(InferenceError::InvalidArgument(format!(
                "{} is not a distribution over a real value",
                other.kind()
            ))),
        }
    }

    /// Density (or mass, for discrete kinds) at `x`. `Noninformative` is the flat function 1.
    pub fn density(&self, x: f64) -> Result<f64, InferenceError> {
        let state = |n: usize| -> Option<usize> {
            (x.fract() == 0.0 && x >= 0.0 && (x as usize) < n).then_some(x as usize)
        };
        match self {
            Distribution::Discrete(d) => Ok(state(d.cardinality())
                .map(|i| d.probabilities()[i])
                .unwrap_or(0.0)),
            Distribution::DiscreteDelta(d) => Ok(match state(d.support_size) {
                Some(i) if i == d.index => 1.0,
                _ => 0.0,
            }),
            Distribution::Gaussian(g) => Ok(g.density(x)),
            Distribution::GaussianDelta(v) => Ok(if x == *v { f64::INFINITY } else { 0.0 }),
            Distribution::Noninformative => Ok(1.0),
            other => Err(InferenceError::InvalidArgument(format!(
                "{} density requires parent values",
                other.kind()
            ))),
        }
    }

    pub fn expected_value(&self) -> Result<f64, InferenceError> {
        match self {
            Distribution::Discrete(d) => Ok(d
                .probabilities()
                .iter()
                .enumerate()
                .map(|(i, p)| i as f64 * p)
                .sum()),
            Distribution::DiscreteDelta(d) => Ok(d.index as f64),
            Distribution::Gaussian(g) => Ok(g.mean),
            Distribution::GaussianDelta(v) => Ok(*v),
            other => Err(InferenceError::InvalidArgument(format!(
                "{} has no expected value",
                other.kind()
            ))),
        }
    }

    /// Interval outside of which the mass is below `epsilon`.
    pub fn effective_support(&self, epsilon: f64) -> Result<(f64, f64), InferenceError> {
        match self {
            Distribution::Discrete(d) => {
                let p = d.probabilities();
                let first = p.iter().position(|v| *v > epsilon).unwrap_or(0);
                let last = p.iter().rposition(|v| *v > epsilon).unwrap_or(p.len() - 1);
                Ok((first as f64, last as f64))
            }
            Distribution::DiscreteDelta(d) => Ok((d.index as f64, d.index as f64)),
            Distribution::Gaussian(g) => {
                let z = (-2.0 * epsilon.clamp(f64::MIN_POSITIVE, 1.0).ln()).sqrt();
                Ok((g.mean - z * g.std_dev, g.mean + z * g.std_dev))
            }
            Distribution::GaussianDelta(v) => Ok((*v, *v)),
            Distribution::Noninformative => Ok((f64::NEG_INFINITY, f64::INFINITY)),
            other => Err(InferenceError::InvalidArgument(format!(
                "{} support requires parent values",
                other.kind()
            ))),
        }
    }

    /// The node's distribution when it has no parents.
    pub fn unconditional(&self) -> Result<Distribution, InferenceError> {
        match self {
            Distribution::ConditionalDiscrete(c) if c.parent_cardinalities().is_empty() => {
                Ok(Distribution::Discrete(Discrete::new(c.row(0).to_vec())?))
            }
            Distribution::LinearGaussian(lg) if lg.weights().is_empty() => {
                Gaussian::from_moments(lg.offset(), lg.std_dev() * lg.std_dev())
            }
            Distribution::ConditionalDiscrete(_) | Distribution::LinearGaussian(_) => {
                Err(InferenceError::InvalidArgument(format!(
                    "{} with {} parents has no unconditional form",
                    self.kind(),
                    self.parent_count()
                )))
            }
            other => Ok(other.clone()),
        }
    }

    /// Distance used for convergence checks; infinite across incompatible kinds.
    pub fn distance(&self, other: &Distribution) -> f64 {
        match (self, other) {
            (Distribution::Discrete(a), Distribution::Discrete(b))
                if a.cardinality() == b.cardinality() =>
            {
                a.probabilities()
                    .iter()
                    .zip(b.probabilities())
                    .map(|(x, y)| (x - y).abs())
                    .fold(0.0, f64::max)
            }
            (Distribution::Gaussian(a), Distribution::Gaussian(b)) => {
                (a.mean - b.mean).abs() + (a.std_dev - b.std_dev).abs()
            }
            (a, b) if a == b => 0.0,
            _ => f64::INFINITY,
        }
    }

    /// `KL(self || other)` in nats.
    pub fn kl_divergence(&self, other: &Distribution) -> Result<f64, InferenceError> {
        match (self, other) {
            (
                Distribution::Discrete(_) | Distribution::DiscreteDelta(_),
                Distribution::Discrete(q),
            ) => {
                let p = self.as_probabilities(q.cardinality())?;
                Ok(p.iter()
                    .zip(q.probabilities())
                    .filter(|(pi, _)| **pi > 0.0)
                    .map(|(pi, qi)| {
                        if *qi == 0.0 {
                            f64::INFINITY
                        } else {
                            pi * (pi / qi).ln()
                        }
                    })
                    .sum())
            }
            (Distribution::Gaussian(p), Distribution::Gaussian(q)) => Ok((q.std_dev
                / p.std_dev)
                .ln()
                + (p.variance() + (p.mean - q.mean).powi(2)) / (2.0 * q.variance())
                - 0.5),
            (Distribution::GaussianDelta(_), Distribution::Gaussian(_)) => Ok(f64::INFINITY),
            (a, b) if a == b => Ok(0.0),
            (a, b) => Err(InferenceError::InvalidArgument(format!(
                "information between {} and {} is not defined",
                a.kind(),
                b.kind()
            ))),
        }
    }
}

impl From<Discrete> for Distribution {
    fn from(d: Discrete) -> Self {
        Distribution::Discrete(d)
    }
}

impl From<Gaussian> for Distribution {
    fn from(g: Gaussian) -> Self {
        Distribution::Gaussian(g)
    }
}

impl From<DiscreteDelta> for Distribution {
    fn from(d: DiscreteDelta) -> Self {
        Distribution::DiscreteDelta(d)
    }
}

impl Display for Distribution {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Distribution::Discrete(d) => write!(f, "Discrete{:?}", d.probabilities()),
            Distribution::DiscreteDelta(d) => {
                write!(f, "DiscreteDelta({} of {})", d.index, d.support_size)
            }
            Distribution::Gaussian(g) => write!(f, "Gaussian(mean={}, sd={})", g.mean, g.std_dev),
            Distribution::GaussianDelta(v) => write!(f, "GaussianDelta({v})"),
            Distribution::Noninformative => write!(f, "Noninformative"),
            Distribution::ConditionalDiscrete(c) => write!(
                f,
                "ConditionalDiscrete({} states | parents {:?})",
                c.cardinality(),
                c.parent_cardinalities()
            ),
            Distribution::LinearGaussian(lg) => write!(
                f,
                "LinearGaussian(weights={:?}, offset={}, sd={})",
                lg.weights(),
                lg.offset(),
                lg.std_dev()
            ),
        }
    }
}
