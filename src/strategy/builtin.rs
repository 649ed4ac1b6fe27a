//! Built-in strategies for discrete tables and linear-gaussian models.
//!
//! Products treat `Noninformative` as the identity and let an indicator absorb any compatible
//! factor. All discrete results are normalized, which leaves likelihood messages unchanged up
//! to scale.
use super::{
    KindPattern, LambdaMessageInput, SignatureSlot, Strategy, StrategyRegistry, TypeSignature,
    CONTINUOUS_FAMILY, CONTINUOUS_LIKE, DISCRETE_FAMILY, DISCRETE_LIKE,
};
use crate::{
    distribution::{DistKind, DistKindSet, Discrete, DiscreteDelta, Distribution, Gaussian},
    error::InferenceError,
};
use enumset::enum_set;

const DELTAS: DistKindSet = enum_set!(DistKind::DiscreteDelta | DistKind::GaussianDelta);
const DENSE: DistKindSet = enum_set!(DistKind::Discrete | DistKind::Gaussian);

/// Tolerance for two indicators to be considered the same value.
const DELTA_MATCH: f64 = 1e-12;

pub fn register_builtins(registry: &StrategyRegistry) -> Result<(), InferenceError> {
    use KindPattern::{Any, Exact, OneOf};
    use SignatureSlot as S;

    // pi
    registry.register(
        "conditional-discrete-pi",
        TypeSignature::new(vec![
            S::one(Exact(DistKind::ConditionalDiscrete)),
            S::rest(OneOf(DISCRETE_FAMILY), 0),
        ])?,
        Strategy::pi(conditional_discrete_pi),
    )?;
    registry.register(
        "linear-gaussian-pi",
        TypeSignature::new(vec![
            S::one(Exact(DistKind::LinearGaussian)),
            S::rest(OneOf(CONTINUOUS_FAMILY), 0),
        ])?,
        Strategy::pi(linear_gaussian_pi),
    )?;

    // lambda
    registry.register(
        "discrete-lambda-product",
        TypeSignature::new(vec![
            S::one(OneOf(DISCRETE_LIKE)),
            S::rest(OneOf(DISCRETE_LIKE), 1),
        ])?,
        Strategy::lambda(|messages| discrete_product(messages.iter())),
    )?;
    registry.register(
        "gaussian-lambda-product",
        TypeSignature::new(vec![
            S::one(OneOf(CONTINUOUS_LIKE)),
            S::rest(OneOf(CONTINUOUS_LIKE), 1),
        ])?,
        Strategy::lambda(|messages| gaussian_product(messages.iter())),
    )?;

    // pi-message
    registry.register(
        "discrete-pi-message",
        TypeSignature::new(vec![
            S::one(Exact(DistKind::Discrete)),
            S::rest(OneOf(DISCRETE_LIKE), 1),
        ])?,
        Strategy::pi_message(|pi, messages| {
            discrete_product(std::iter::once(pi).chain(messages.iter()))
        }),
    )?;
    registry.register(
        "gaussian-pi-message",
        TypeSignature::new(vec![
            S::one(Exact(DistKind::Gaussian)),
            S::rest(OneOf(CONTINUOUS_LIKE), 1),
        ])?,
        Strategy::pi_message(|pi, messages| {
            gaussian_product(std::iter::once(pi).chain(messages.iter()))
        }),
    )?;
    registry.register(
        "flat-discrete-pi-message",
        TypeSignature::new(vec![
            S::one(Exact(DistKind::Noninformative)),
            S::rest(OneOf(DISCRETE_LIKE), 1),
        ])?,
        Strategy::pi_message(|_, messages| discrete_product(messages.iter())),
    )?;
    registry.register(
        "flat-gaussian-pi-message",
        TypeSignature::new(vec![
            S::one(Exact(DistKind::Noninformative)),
            S::rest(OneOf(CONTINUOUS_LIKE), 1),
        ])?,
        Strategy::pi_message(|_, messages| gaussian_product(messages.iter())),
    )?;

    // lambda-message
    registry.register(
        "conditional-discrete-lambda-message",
        TypeSignature::new(vec![
            S::one(Exact(DistKind::ConditionalDiscrete)),
            S::one(OneOf(DISCRETE_LIKE)),
            S::rest(OneOf(DISCRETE_FAMILY), 0),
        ])?,
        Strategy::lambda_message(conditional_discrete_lambda_message),
    )?;
    registry.register(
        "linear-gaussian-lambda-message",
        TypeSignature::new(vec![
            S::one(Exact(DistKind::LinearGaussian)),
            S::one(OneOf(CONTINUOUS_LIKE)),
            S::rest(OneOf(CONTINUOUS_FAMILY), 0),
        ])?,
        Strategy::lambda_message(linear_gaussian_lambda_message),
    )?;

    // posterior
    registry.register(
        "posterior-flat-lambda",
        TypeSignature::new(vec![S::one(Any), S::one(Exact(DistKind::Noninformative))])?,
        Strategy::posterior(|pi, _| Ok(pi.clone())),
    )?;
    registry.register(
        "posterior-flat-pi",
        TypeSignature::new(vec![
            S::one(Exact(DistKind::Noninformative)),
            S::one(OneOf(DENSE)),
        ])?,
        Strategy::posterior(|_, lambda| Ok(lambda.clone())),
    )?;
    registry.register(
        "posterior-evidence",
        TypeSignature::new(vec![S::one(Any), S::one(OneOf(DELTAS))])?,
        Strategy::posterior(|_, lambda| Ok(lambda.clone())),
    )?;
    registry.register(
        "posterior-determined",
        TypeSignature::new(vec![S::one(OneOf(DELTAS)), S::one(OneOf(DENSE))])?,
        Strategy::posterior(|pi, _| Ok(pi.clone())),
    )?;
    registry.register(
        "discrete-posterior",
        TypeSignature::new(vec![
            S::one(Exact(DistKind::Discrete)),
            S::one(Exact(DistKind::Discrete)),
        ])?,
        Strategy::posterior(|pi, lambda| discrete_product([pi, lambda].into_iter())),
    )?;
    registry.register(
        "gaussian-posterior",
        TypeSignature::new(vec![
            S::one(Exact(DistKind::Gaussian)),
            S::one(Exact(DistKind::Gaussian)),
        ])?,
        Strategy::posterior(|pi, lambda| gaussian_product([pi, lambda].into_iter())),
    )?;

    Ok(())
}

/// Normalized pointwise product over discrete states.
pub fn discrete_product<'a>(
    factors: impl Iterator<Item = &'a Distribution> + Clone,
) -> Result<Distribution, InferenceError> {
    let cardinality = factors
        .clone()
        .find_map(|f| f.cardinality())
        .ok_or_else(|| {
            InferenceError::InvalidArgument("discrete product has no sized factor".to_string())
        })?;
    let mut product = vec![1.0; cardinality];
    let mut delta: Option<DiscreteDelta> = None;
    for factor in factors {
        if let Distribution::DiscreteDelta(d) = factor {
            if let Some(prior) = delta {
                if prior != *d {
                    return Err(InferenceError::Numerical(
                        "conflicting discrete evidence".to_string(),
                    ));
                }
            }
            delta = Some(*d);
        }
        for (acc, p) in product.iter_mut().zip(factor.as_probabilities(cardinality)?) {
            *acc *= p;
        }
    }
    if let Some(d) = delta {
        if product[d.index] > 0.0 {
            return Ok(Distribution::DiscreteDelta(d));
        }
    }
    match Discrete::new(product) {
        Ok(d) => Ok(Distribution::Discrete(d)),
        Err(InferenceError::Numerical(_)) => Err(InferenceError::Numerical(
            "discrete product has no probability mass; evidence is inconsistent".to_string(),
        )),
        Err(e) => Err(e),
    }
}

/// Product of gaussian factors by precision weighting.
pub fn gaussian_product<'a>(
    factors: impl Iterator<Item = &'a Distribution>,
) -> Result<Distribution, InferenceError> {
    let mut delta: Option<f64> = None;
    let mut precision = 0.0;
    let mut weighted = 0.0;
    for factor in factors {
        match factor.as_moments()? {
            None => {}
            Some((mean, variance)) if variance == 0.0 => {
                if delta.is_some_and(|v| (v - mean).abs() > DELTA_MATCH) {
                    return Err(InferenceError::Numerical(
                        "conflicting continuous evidence".to_string(),
                    ));
                }
                delta = Some(mean);
            }
            Some((mean, variance)) => {
                precision += 1.0 / variance;
                weighted += mean / variance;
            }
        }
    }
    match delta {
        Some(v) => Ok(Distribution::GaussianDelta(v)),
        None if precision == 0.0 => Ok(Distribution::Noninformative),
        None => Gaussian::from_moments(weighted / precision, 1.0 / precision),
    }
}

fn conditional_discrete_pi(
    conditional: &Distribution,
    messages: &[Distribution],
) -> Result<Distribution, InferenceError> {
    let Distribution::ConditionalDiscrete(table) = conditional else {
        return Err(InferenceError::InvalidArgument(format!(
            "expected ConditionalDiscrete, got {}",
            conditional.kind()
        )));
    };
    let cards = table.parent_cardinalities();
    if messages.len() != cards.len() {
        return Err(InferenceError::InvalidArgument(format!(
            "conditional table has {} parents, got {} pi-messages",
            cards.len(),
            messages.len()
        )));
    }
    let parents = messages
        .iter()
        .zip(cards)
        .map(|(m, card)| m.as_probabilities(*card))
        .collect::<Result<Vec<_>, _>>()?;

    let mut pi = vec![0.0; table.cardinality()];
    for configuration in 0..table.configurations() {
        let states = table.decode(configuration);
        let weight: f64 = states
            .iter()
            .enumerate()
            .map(|(i, s)| parents[i][*s])
            .product();
        if weight == 0.0 {
            continue;
        }
        for (acc, p) in pi.iter_mut().zip(table.row(configuration)) {
            *acc += weight * p;
        }
    }
    Ok(Distribution::Discrete(Discrete::new(pi)?))
}

fn linear_gaussian_pi(
    conditional: &Distribution,
    messages: &[Distribution],
) -> Result<Distribution, InferenceError> {
    let Distribution::LinearGaussian(model) = conditional else {
        return Err(InferenceError::InvalidArgument(format!(
            "expected LinearGaussian, got {}",
            conditional.kind()
        )));
    };
    if messages.len() != model.weights().len() {
        return Err(InferenceError::InvalidArgument(format!(
            "linear gaussian has {} parents, got {} pi-messages",
            model.weights().len(),
            messages.len()
        )));
    }
    let mut mean = model.offset();
    let mut variance = model.std_dev() * model.std_dev();
    for (a, message) in model.weights().iter().zip(messages) {
        if *a == 0.0 {
            continue;
        }
        match message.as_moments()? {
            None => return Ok(Distribution::Noninformative),
            Some((mu, v)) => {
                mean += a * mu;
                variance += a * a * v;
            }
        }
    }
    Gaussian::from_moments(mean, variance)
}

fn conditional_discrete_lambda_message(
    input: &LambdaMessageInput,
) -> Result<Distribution, InferenceError> {
    let Distribution::ConditionalDiscrete(table) = input.conditional else {
        return Err(InferenceError::InvalidArgument(format!(
            "expected ConditionalDiscrete, got {}",
            input.conditional.kind()
        )));
    };
    let cards = table.parent_cardinalities();
    let target = input.parent_index;
    if target >= cards.len() || input.pi_messages.len() != cards.len() {
        return Err(InferenceError::InvalidArgument(format!(
            "lambda-message to parent {target} of a {}-parent table with {} pi-messages",
            cards.len(),
            input.pi_messages.len()
        )));
    }
    let lambda = input.lambda.as_probabilities(table.cardinality())?;
    let others = input
        .pi_messages
        .iter()
        .zip(cards)
        .map(|(m, card)| match m {
            Some(m) => m.as_probabilities(*card),
            None => Distribution::Noninformative.as_probabilities(*card),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut message = vec![0.0; cards[target]];
    for configuration in 0..table.configurations() {
        let states = table.decode(configuration);
        let weight: f64 = states
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != target)
            .map(|(i, s)| others[i][*s])
            .product();
        if weight == 0.0 {
            continue;
        }
        let agreement: f64 = table
            .row(configuration)
            .iter()
            .zip(&lambda)
            .map(|(p, l)| p * l)
            .sum();
        message[states[target]] += weight * agreement;
    }
    match Discrete::new(message) {
        Ok(d) => Ok(Distribution::Discrete(d)),
        Err(InferenceError::Numerical(_)) => Err(InferenceError::Numerical(
            "lambda-message has no mass; evidence is impossible under the table".to_string(),
        )),
        Err(e) => Err(e),
    }
}

fn linear_gaussian_lambda_message(
    input: &LambdaMessageInput,
) -> Result<Distribution, InferenceError> {
    let Distribution::LinearGaussian(model) = input.conditional else {
        return Err(InferenceError::InvalidArgument(format!(
            "expected LinearGaussian, got {}",
            input.conditional.kind()
        )));
    };
    let weights = model.weights();
    let target = input.parent_index;
    if target >= weights.len() || input.pi_messages.len() != weights.len() {
        return Err(InferenceError::InvalidArgument(format!(
            "lambda-message to parent {target} of a {}-parent model with {} pi-messages",
            weights.len(),
            input.pi_messages.len()
        )));
    }
    let a_k = weights[target];
    let Some((lambda_mean, lambda_var)) = input.lambda.as_moments()? else {
        return Ok(Distribution::Noninformative);
    };
    if a_k == 0.0 {
        return Ok(Distribution::Noninformative);
    }

    let mut mean = lambda_mean - model.offset();
    let mut variance = lambda_var + model.std_dev() * model.std_dev();
    for (j, (a, message)) in weights.iter().zip(input.pi_messages).enumerate() {
        if j == target || *a == 0.0 {
            continue;
        }
        let moments = match message {
            Some(m) => m.as_moments()?,
            None => None,
        };
        match moments {
            None => return Ok(Distribution::Noninformative),
            Some((mu, v)) => {
                mean -= a * mu;
                variance += a * a * v;
            }
        }
    }
    Gaussian::from_moments(mean / a_k, variance / (a_k * a_k))
}
