use crate::{error::InferenceError, network::BeliefNetwork};
use std::{collections::BTreeMap, fmt::Write};

/// Graphviz rendering of `network` and the foreign parents it refers to.
///
/// Evidence nodes are shaded gray, parents that could not be resolved yellow.
pub fn dot_format(network: &BeliefNetwork) -> Result<String, InferenceError> {
    let fullname = network.fullname();
    let snapshots = network.snapshots();
    let mut out = String::new();
    writeln!(out, "digraph \"{fullname}\" {{")?;
    writeln!(out, "  subgraph \"cluster_{fullname}\" {{")?;
    writeln!(out, "    label = \"{}\";", network.name())?;
    for snapshot in &snapshots {
        let style = if snapshot.is_evidence() {
            ", color=gray92, style=filled"
        } else {
            ""
        };
        writeln!(
            out,
            "    \"{}\" [label=\"{}\"{style}];",
            snapshot.key, snapshot.key.variable
        )?;
    }
    writeln!(out, "  }}")?;

    // foreign or missing parents, keyed by id; value is whether the link is resolved
    let mut outside: BTreeMap<String, bool> = BTreeMap::new();
    let mut edges = Vec::new();
    for snapshot in &snapshots {
        for parent in &snapshot.parents {
            let id = parent.key.to_string();
            let local = parent.key.network == fullname
                && network.lookup(&parent.key.variable).is_some();
            if !local {
                let resolved = outside.entry(id.clone()).or_insert(parent.resolved);
                *resolved &= parent.resolved;
            }
            edges.push((id, snapshot.key.to_string()));
        }
    }
    for (id, resolved) in &outside {
        let style = if *resolved {
            ""
        } else {
            ", color=yellow, style=filled"
        };
        writeln!(out, "  \"{id}\" [label=\"{id}\"{style}];")?;
    }
    for (parent, child) in &edges {
        writeln!(out, "  \"{parent}\" -> \"{child}\";")?;
    }
    writeln!(out, "}}")?;
    Ok(out)
}
