use super::lexer::{tokenize, Token, TokenStream};
use crate::{
    distribution::{
        ConditionalDiscrete, Discrete, DiscreteDelta, Distribution, Gaussian, LinearGaussian,
    },
    error::InferenceError,
    network::{NetworkKind, VariableType},
};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Structure of a network, independent of any evidence or cached beliefs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDescription {
    pub name: String,
    pub kind: NetworkKind,
    pub accept_remote_child_evidence: bool,
    pub variables: Vec<VariableDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDescription {
    pub name: String,
    pub var_type: VariableType,
    /// As written: a local name or `[host[:port]/]network.variable`.
    pub parents: Vec<String>,
    pub distribution: Option<Distribution>,
}

pub fn parse_network(text: &str) -> Result<NetworkDescription, InferenceError> {
    let mut stream = TokenStream::new(tokenize(text)?);
    let class = stream.word()?;
    let kind = NetworkKind::from_class_name(&class)
        .ok_or_else(|| stream.error(format!("unknown network class '{class}'")))?;
    let name = stream.word()?;
    stream.open()?;

    let mut description = NetworkDescription {
        name,
        kind,
        accept_remote_child_evidence: true,
        variables: Vec::new(),
    };
    while !stream.try_close() {
        let keyword = stream.word()?;
        match keyword.as_str() {
            "accept-remote-child-evidence" => {
                description.accept_remote_child_evidence = stream.boolean()?
            }
            "Variable" => description.variables.push(parse_variable(&mut stream)?),
            other => return Err(stream.error(format!("unexpected '{other}' in network body"))),
        }
    }
    if !stream.is_done() {
        return Err(stream.error("trailing input after network"));
    }
    Ok(description)
}

fn parse_variable(stream: &mut TokenStream) -> Result<VariableDescription, InferenceError> {
    let name = stream.word()?;
    stream.open()?;
    let mut variable = VariableDescription {
        name,
        var_type: VariableType::Unknown,
        parents: Vec::new(),
        distribution: None,
    };
    while !stream.try_close() {
        let keyword = stream.word()?;
        match keyword.as_str() {
            "type" => variable.var_type = parse_type(stream)?,
            "parents" => variable.parents = stream.list(|s| s.word())?,
            "distribution" => variable.distribution = Some(parse_distribution(stream)?),
            other => {
                return Err(stream.error(format!(
                    "unexpected '{other}' in variable '{}'",
                    variable.name
                )))
            }
        }
    }
    Ok(variable)
}

fn parse_type(stream: &mut TokenStream) -> Result<VariableType, InferenceError> {
    match stream.word()?.as_str() {
        "discrete" => {
            let states = if stream.peek() == Some(&Token::Open) {
                Some(stream.list(|s| s.word())?)
            } else {
                None
            };
            Ok(VariableType::Discrete { states })
        }
        "continuous" => Ok(VariableType::Continuous),
        other => Err(stream.error(format!("unknown variable type '{other}'"))),
    }
}

/// Distribution body fields, each at most once and in any order.
#[derive(Default)]
struct Fields {
    probabilities: Option<Vec<f64>>,
    parent_cardinalities: Option<Vec<usize>>,
    weights: Option<Vec<f64>>,
    cardinality: Option<usize>,
    support_size: Option<usize>,
    mean: Option<f64>,
    std_dev: Option<f64>,
    offset: Option<f64>,
    value: Option<f64>,
}

fn required<T>(
    stream: &TokenStream,
    field: Option<T>,
    name: &str,
    class: &str,
) -> Result<T, InferenceError> {
    field.ok_or_else(|| stream.error(format!("{class} requires '{name}'")))
}

fn parse_distribution(stream: &mut TokenStream) -> Result<Distribution, InferenceError> {
    let class = stream.word()?;
    let line = stream.line();
    stream.open()?;
    let mut fields = Fields::default();
    while !stream.try_close() {
        let field = stream.word()?;
        match field.as_str() {
            "probabilities" => fields.probabilities = Some(stream.list(|s| s.number())?),
            "parent-cardinalities" => {
                fields.parent_cardinalities = Some(stream.list(|s| s.count())?)
            }
            "weights" => fields.weights = Some(stream.list(|s| s.number())?),
            "cardinality" => fields.cardinality = Some(stream.count()?),
            "support-size" => fields.support_size = Some(stream.count()?),
            "mean" => fields.mean = Some(stream.number()?),
            "std-deviation" => fields.std_dev = Some(stream.number()?),
            "offset" => fields.offset = Some(stream.number()?),
            "value" => fields.value = Some(stream.number()?),
            other => return Err(stream.error(format!("unexpected '{other}' in {class}"))),
        }
    }

    let at_line = |e: InferenceError| match e {
        InferenceError::Parse { .. } => e,
        other => InferenceError::Parse {
            line,
            message: other.to_string(),
        },
    };
    let distribution = match class.as_str() {
        "Discrete" => Discrete::new(required(
            stream,
            fields.probabilities,
            "probabilities",
            &class,
        )?)
        .map(Distribution::Discrete),
        "DiscreteDelta" => {
            let size = required(stream, fields.support_size, "support-size", &class)?;
            let value = required(stream, fields.value, "value", &class)?;
            if value.fract() != 0.0 || value < 0.0 {
                return Err(stream.error(format!(
                    "DiscreteDelta value must be a state index, got {value}"
                )));
            }
            DiscreteDelta::new(size, value as usize).map(Distribution::DiscreteDelta)
        }
        "Gaussian" => Gaussian::new(
            required(stream, fields.mean, "mean", &class)?,
            required(stream, fields.std_dev, "std-deviation", &class)?,
        )
        .map(Distribution::Gaussian),
        "GaussianDelta" => Ok(Distribution::GaussianDelta(required(
            stream,
            fields.value,
            "value",
            &class,
        )?)),
        "Noninformative" => Ok(Distribution::Noninformative),
        "ConditionalDiscrete" => ConditionalDiscrete::new(
            fields.parent_cardinalities.unwrap_or_default(),
            required(stream, fields.cardinality, "cardinality", &class)?,
            required(stream, fields.probabilities, "probabilities", &class)?,
        )
        .map(Distribution::ConditionalDiscrete),
        "LinearGaussian" => LinearGaussian::new(
            fields.weights.unwrap_or_default(),
            fields.offset.unwrap_or(0.0),
            required(stream, fields.std_dev, "std-deviation", &class)?,
        )
        .map(Distribution::LinearGaussian),
        other => {
            return Err(InferenceError::Parse {
                line,
                message: format!("unknown distribution class '{other}'"),
            })
        }
    };
    distribution.map_err(at_line)
}

/// Canonical text for `description`; [`parse_network`] reads it back unchanged.
pub fn format_network(description: &NetworkDescription) -> Result<String, InferenceError> {
    let mut out = String::new();
    writeln!(out, "{} {} {{", description.kind.class_name(), description.name)?;
    if !description.accept_remote_child_evidence {
        writeln!(out, "    accept-remote-child-evidence false")?;
    }
    for variable in &description.variables {
        writeln!(out, "    Variable {} {{", variable.name)?;
        match &variable.var_type {
            VariableType::Discrete { states: None } => writeln!(out, "        type discrete")?,
            VariableType::Discrete {
                states: Some(states),
            } => {
                let quoted: Vec<String> = states.iter().map(|s| quote(s)).collect();
                writeln!(out, "        type discrete {{ {} }}", quoted.join(" "))?
            }
            VariableType::Continuous => writeln!(out, "        type continuous")?,
            VariableType::Unknown => {}
        }
        if !variable.parents.is_empty() {
            writeln!(out, "        parents {{ {} }}", variable.parents.join(" "))?;
        }
        if let Some(distribution) = &variable.distribution {
            format_distribution(&mut out, distribution)?;
        }
        writeln!(out, "    }}")?;
    }
    writeln!(out, "}}")?;
    Ok(out)
}

fn format_distribution(
    out: &mut String,
    distribution: &Distribution,
) -> Result<(), InferenceError> {
    writeln!(out, "        distribution {} {{", distribution.class_name())?;
    let indent = "            ";
    match distribution {
        Distribution::Discrete(d) => {
            writeln!(out, "{indent}probabilities {{ {} }}", join(d.probabilities()))?
        }
        Distribution::DiscreteDelta(d) => {
            writeln!(out, "{indent}support-size {}", d.support_size)?;
            writeln!(out, "{indent}value {}", d.index)?;
        }
        Distribution::Gaussian(g) => {
            writeln!(out, "{indent}mean {}", g.mean)?;
            writeln!(out, "{indent}std-deviation {}", g.std_dev)?;
        }
        Distribution::GaussianDelta(v) => writeln!(out, "{indent}value {v}")?,
        Distribution::Noninformative => {}
        Distribution::ConditionalDiscrete(c) => {
            let cards: Vec<String> = c
                .parent_cardinalities()
                .iter()
                .map(|n| n.to_string())
                .collect();
            writeln!(out, "{indent}parent-cardinalities {{ {} }}", cards.join(" "))?;
            writeln!(out, "{indent}cardinality {}", c.cardinality())?;
            writeln!(out, "{indent}probabilities {{ {} }}", join(c.probabilities()))?;
        }
        Distribution::LinearGaussian(lg) => {
            writeln!(out, "{indent}weights {{ {} }}", join(lg.weights()))?;
            writeln!(out, "{indent}offset {}", lg.offset())?;
            writeln!(out, "{indent}std-deviation {}", lg.std_dev())?;
        }
    }
    writeln!(out, "        }}")?;
    Ok(())
}

fn join(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}
