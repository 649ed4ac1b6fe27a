use super::{
    peer::{LinkTarget, NetworkHandle},
    variable::{ChildLink, ParentLink, Variable, VariableSnapshot, VariableType},
    PropagationToken,
};
use crate::{
    codec::{self, NetworkDescription, VariableDescription},
    context::Context,
    distribution::Distribution,
    error::InferenceError,
    event::{EventSlot, NodeEvent, ObserverSet, SlotChange},
    nameinfo::{NameInfo, VariableKey},
    strategy::StrategyRegistry,
};
use parking_lot::RwLock;
use petgraph::{algo, graphmap::DiGraphMap};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    fmt::{Debug, Display, Formatter},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum NetworkKind {
    /// On-demand computation over an acyclic graph.
    #[default]
    Pull,
    /// Cycles allowed; posteriors come from iterated sweeps.
    Loopy,
}

impl NetworkKind {
    pub fn class_name(&self) -> &'static str {
        match self {
            NetworkKind::Pull => "BeliefNetwork",
            NetworkKind::Loopy => "LoopyBeliefNetwork",
        }
    }

    pub fn from_class_name(name: &str) -> Option<NetworkKind> {
        match name {
            "BeliefNetwork" => Some(NetworkKind::Pull),
            "LoopyBeliefNetwork" => Some(NetworkKind::Loopy),
            _ => None,
        }
    }
}

impl Display for NetworkKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.class_name())
    }
}

pub struct BeliefNetwork {
    name: String,
    fullname: String,
    host: String,
    port: u16,
    kind: NetworkKind,
    context: Weak<Context>,
    variables: RwLock<BTreeMap<String, Arc<Variable>>>,
    /// Exclusive for evidence changes and sweeps, shared (recursively) for queries.
    pub(super) update_gate: RwLock<()>,
    stale: AtomicBool,
    accept_remote_child_evidence: AtomicBool,
    observers: ObserverSet,
}

impl Debug for BeliefNetwork {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.debug_struct("BeliefNetwork")
            .field("fullname", &self.fullname)
            .field("kind", &self.kind)
            .field("variables", &self.variable_names())
            .field("stale", &self.is_stale())
            .finish()
    }
}

impl BeliefNetwork {
    pub(crate) fn new(
        name: &str,
        kind: NetworkKind,
        context: Weak<Context>,
        host: &str,
        port: u16,
    ) -> Result<Arc<BeliefNetwork>, InferenceError> {
        check_identifier(name, "network")?;
        Ok(Arc::new(BeliefNetwork {
            name: name.to_string(),
            fullname: NameInfo {
                host: host.to_string(),
                port,
                network: name.to_string(),
                variable: None,
            }
            .network_fullname(),
            host: host.to_string(),
            port,
            kind,
            context,
            variables: RwLock::new(BTreeMap::new()),
            update_gate: RwLock::new(()),
            stale: AtomicBool::new(false),
            accept_remote_child_evidence: AtomicBool::new(true),
            observers: ObserverSet::default(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `host:port/name`
    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    pub fn kind(&self) -> NetworkKind {
        self.kind
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_stale(&self) {
        tracing::info!("[BeliefNetwork::mark_stale] {} decommissioned", self.fullname);
        self.stale.store(true, Ordering::SeqCst);
    }

    pub(crate) fn check_stale(&self) -> Result<(), InferenceError> {
        if self.is_stale() {
            return Err(InferenceError::StaleReference(self.fullname.clone()));
        }
        Ok(())
    }

    /// Whether lambda messages from children in other networks are used.
    pub fn accept_remote_child_evidence(&self) -> bool {
        self.accept_remote_child_evidence.load(Ordering::SeqCst)
    }

    pub fn set_accept_remote_child_evidence(&self, accept: bool) {
        self.accept_remote_child_evidence
            .store(accept, Ordering::SeqCst);
    }

    pub fn subscribe(&self, variable: Option<&str>) -> UnboundedReceiver<NodeEvent> {
        self.observers.subscribe(variable)
    }

    pub(super) fn emit(&self, variable: &Variable, slot: EventSlot, change: SlotChange) {
        if self.observers.is_empty() {
            return;
        }
        self.observers.notify(NodeEvent {
            network: self.fullname.clone(),
            variable: variable.name().to_string(),
            slot,
            change,
            generation: variable.generation(),
        });
    }

    pub(crate) fn context(&self) -> Result<Arc<Context>, InferenceError> {
        self.context.upgrade().ok_or_else(|| {
            InferenceError::StaleReference(format!("{} outlived its context", self.fullname))
        })
    }

    pub(super) fn registry(&self) -> Result<StrategyRegistry, InferenceError> {
        Ok(self.context()?.registry().clone())
    }

    pub(super) fn next_token(&self) -> Result<PropagationToken, InferenceError> {
        Ok(self.context()?.next_token())
    }

    pub fn variable(&self, name: &str) -> Result<Arc<Variable>, InferenceError> {
        self.lookup(name).ok_or_else(|| {
            InferenceError::NotFound(format!("variable '{name}' in {}", self.fullname))
        })
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Variable>> {
        self.variables.read().get(name).cloned()
    }

    pub fn variables(&self) -> Vec<Arc<Variable>> {
        self.variables.read().values().cloned().collect()
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.variables.read().keys().cloned().collect()
    }

    pub fn snapshot(&self, name: &str) -> Result<VariableSnapshot, InferenceError> {
        Ok(self.variable(name)?.snapshot())
    }

    pub fn generation(&self, name: &str) -> Result<u64, InferenceError> {
        Ok(self.variable(name)?.generation())
    }

    pub fn snapshots(&self) -> Vec<VariableSnapshot> {
        self.variables().iter().map(|v| v.snapshot()).collect()
    }

    pub fn key_of(&self, variable: &str) -> VariableKey {
        VariableKey::new(&self.fullname, variable)
    }

    /// Add a variable. `parents` are local names or `[host[:port]/]network.variable`.
    ///
    /// Parent references are not resolved until [`BeliefNetwork::assign_references`].
    pub fn add_variable(
        &self,
        name: &str,
        var_type: VariableType,
        parents: &[String],
        distribution: Option<Distribution>,
    ) -> Result<Arc<Variable>, InferenceError> {
        self.check_stale()?;
        check_identifier(name, "variable")?;
        if let Some(d) = &distribution {
            check_arity(name, d, parents.len())?;
            check_states(name, &var_type, d)?;
        }

        let mut seen = HashSet::new();
        let mut links = Vec::with_capacity(parents.len());
        for declared in parents {
            let key = self.parent_key(declared)?;
            if !seen.insert(key.clone()) {
                return Err(InferenceError::InvalidArgument(format!(
                    "variable '{name}' lists parent '{declared}' twice"
                )));
            }
            links.push(ParentLink {
                declared: declared.clone(),
                key,
                target: LinkTarget::Unresolved,
                message: None,
                prior: None,
            });
        }

        let mut variables = self.variables.write();
        if variables.contains_key(name) {
            return Err(InferenceError::InvalidArgument(format!(
                "{} already has a variable named '{name}'",
                self.fullname
            )));
        }
        let variable = Arc::new(Variable::new(
            self.key_of(name),
            var_type,
            distribution,
            links,
        ));
        variables.insert(name.to_string(), variable.clone());
        tracing::debug!("[BeliefNetwork::add_variable] {}", variable.key());
        Ok(variable)
    }

    fn parent_key(&self, declared: &str) -> Result<VariableKey, InferenceError> {
        if !declared.contains(['.', '/']) {
            check_identifier(declared, "parent")?;
            return Ok(self.key_of(declared));
        }
        let info = NameInfo::parse(declared, &self.host, self.port)?;
        info.variable_key().ok_or_else(|| {
            InferenceError::InvalidArgument(format!(
                "parent reference '{declared}' does not name a variable"
            ))
        })
    }

    /// Resolve every parent reference and register this network's variables as children.
    ///
    /// A missing local or remote variable is tolerated with a warning; an unreachable or
    /// unknown foreign network is an [`InferenceError::UnknownParent`].
    pub fn assign_references(&self) -> Result<(), InferenceError> {
        self.check_stale()?;
        for variable in self.variables() {
            let parents = variable.lock().parents.clone();
            for (index, parent) in parents.iter().enumerate() {
                if !parent.target.is_unresolved() {
                    continue;
                }
                let (target, prior) = if parent.key.network == self.fullname {
                    if self.lookup(&parent.key.variable).is_none() {
                        tracing::warn!(
                            "[BeliefNetwork::assign_references] {} names missing parent '{}'",
                            variable.key(),
                            parent.declared
                        );
                        continue;
                    }
                    self.add_child(&parent.key.variable, variable.key())?;
                    (LinkTarget::SameNetwork, None)
                } else {
                    match self.link_foreign_parent(&variable, parent)? {
                        Some(linked) => linked,
                        None => continue,
                    }
                };
                let mut state = variable.lock();
                let Some(slot) = state.parents.get_mut(index) else {
                    continue;
                };
                slot.target = target;
                slot.prior = prior;
                // drop any prior substituted while the link was unresolved
                if slot.message.take().is_some() {
                    state.clear_aggregates();
                }
            }
        }
        if self.kind == NetworkKind::Pull {
            self.check_acyclic()?;
        }
        Ok(())
    }

    fn link_foreign_parent(
        &self,
        variable: &Variable,
        parent: &ParentLink,
    ) -> Result<Option<(LinkTarget, Option<Distribution>)>, InferenceError> {
        let unknown = |reason: String| InferenceError::UnknownParent {
            variable: variable.key().to_string(),
            parent: parent.declared.clone(),
            reason,
        };
        let target = self
            .resolve_target(&parent.key.network)
            .map_err(|e| unknown(e.to_string()))?;
        let name = parent.key.variable.as_str();
        match self.call_link(&target, |h| h.name_lookup(name)) {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!(
                    "[BeliefNetwork::assign_references] {} names missing parent '{}'",
                    variable.key(),
                    parent.declared
                );
                return Ok(None);
            }
            Err(e) => return Err(unknown(e.to_string())),
        }
        self.call_link(&target, |h| h.add_child(name, variable.key()))
            .map_err(|e| unknown(e.to_string()))?;
        let prior = match self.call_link(&target, |h| h.get_prior(name)) {
            Ok(prior) => Some(prior),
            Err(e) => {
                tracing::warn!(
                    "[BeliefNetwork::assign_references] no prior for {}: {}",
                    parent.key,
                    e
                );
                None
            }
        };
        tracing::debug!(
            "[BeliefNetwork::assign_references] linked {} -> {}",
            parent.key,
            variable.key()
        );
        Ok(Some((target, prior)))
    }

    /// Link target for a variable in the network named `network_fullname`.
    pub(super) fn resolve_target(
        &self,
        network_fullname: &str,
    ) -> Result<LinkTarget, InferenceError> {
        if network_fullname == self.fullname {
            return Ok(LinkTarget::SameNetwork);
        }
        let info = NameInfo::parse(network_fullname, &self.host, self.port)?;
        self.context()?.link_to(&info)
    }

    pub(super) fn call_link<T>(
        &self,
        target: &LinkTarget,
        op: impl Fn(&dyn NetworkHandle) -> Result<T, InferenceError>,
    ) -> Result<T, InferenceError> {
        match target {
            LinkTarget::SameNetwork => op(self),
            LinkTarget::Local(weak) => match weak.upgrade() {
                Some(network) => op(network.as_ref()),
                None => Err(InferenceError::StaleReference(
                    "network dropped from its context".to_string(),
                )),
            },
            LinkTarget::Remote(peer) => peer.call(op),
            LinkTarget::Unresolved => Err(InferenceError::NotFound(
                "edge has no resolved endpoint".to_string(),
            )),
        }
    }

    fn local_graph(&self) -> (Vec<Arc<Variable>>, Vec<(String, String)>) {
        let variables = self.variables();
        let mut edges = Vec::new();
        for variable in &variables {
            let state = variable.lock();
            for parent in &state.parents {
                if parent.key.network == self.fullname && !parent.target.is_unresolved() {
                    edges.push((parent.key.variable.clone(), variable.name().to_string()));
                }
            }
        }
        (variables, edges)
    }

    fn check_acyclic(&self) -> Result<(), InferenceError> {
        let (variables, edges) = self.local_graph();
        let mut graph = DiGraphMap::<&str, ()>::new();
        for variable in &variables {
            graph.add_node(variable.name());
        }
        for (parent, child) in &edges {
            graph.add_edge(parent.as_str(), child.as_str(), ());
        }
        if algo::is_cyclic_directed(&graph) {
            return Err(InferenceError::InvalidArgument(format!(
                "{} contains a directed cycle; use a loopy network",
                self.fullname
            )));
        }
        Ok(())
    }

    /// Variables parents-first when the local graph is acyclic, otherwise by name.
    pub(super) fn sweep_order(&self) -> Vec<Arc<Variable>> {
        let (variables, edges) = self.local_graph();
        let mut graph = DiGraphMap::<&str, ()>::new();
        for variable in &variables {
            graph.add_node(variable.name());
        }
        for (parent, child) in &edges {
            graph.add_edge(parent.as_str(), child.as_str(), ());
        }
        match algo::toposort(&graph, None) {
            Ok(order) => order.into_iter().filter_map(|name| self.lookup(name)).collect(),
            Err(_) => variables,
        }
    }

    pub fn describe(&self) -> NetworkDescription {
        NetworkDescription {
            name: self.name.clone(),
            kind: self.kind,
            accept_remote_child_evidence: self.accept_remote_child_evidence(),
            variables: self
                .variables()
                .iter()
                .map(|variable| {
                    let state = variable.lock();
                    VariableDescription {
                        name: variable.name().to_string(),
                        var_type: state.var_type.clone(),
                        parents: state.parents.iter().map(|p| p.declared.clone()).collect(),
                        distribution: state.distribution.clone(),
                    }
                })
                .collect(),
        }
    }

    /// Add every variable of `description`. References are left unresolved.
    pub fn load_description(&self, description: &NetworkDescription) -> Result<(), InferenceError> {
        if description.kind != self.kind {
            return Err(InferenceError::InvalidArgument(format!(
                "cannot load a {} description into {} {}",
                description.kind, self.kind, self.fullname
            )));
        }
        self.set_accept_remote_child_evidence(description.accept_remote_child_evidence);
        for variable in &description.variables {
            self.add_variable(
                &variable.name,
                variable.var_type.clone(),
                &variable.parents,
                variable.distribution.clone(),
            )?;
        }
        Ok(())
    }

    /// Replace this network's variables with those in `text` and resolve references.
    ///
    /// Children registered from other networks stay attached to the variables that keep their
    /// names, and are told that the pi messages they hold are out of date.
    pub fn parse_string(&self, text: &str) -> Result<(), InferenceError> {
        self.check_stale()?;
        let description = codec::parse_network(text)?;
        if description.name != self.name {
            return Err(InferenceError::InvalidArgument(format!(
                "description names network '{}', not '{}'",
                description.name, self.name
            )));
        }
        let previous = {
            let _gate = self.update_gate.write();
            let previous = std::mem::take(&mut *self.variables.write());
            if let Err(e) = self.load_description(&description) {
                *self.variables.write() = previous;
                return Err(e);
            }
            previous
        };
        let resolved = self.assign_references();
        self.carry_over_foreign_links(&previous)?;
        resolved
    }

    /// Move foreign children of replaced variables onto their successors.
    ///
    /// A variable that vanished is unregistered from its foreign parents; its foreign children
    /// keep a parent reference that no longer resolves.
    fn carry_over_foreign_links(
        &self,
        previous: &BTreeMap<String, Arc<Variable>>,
    ) -> Result<(), InferenceError> {
        for (name, old) in previous {
            let (children, parents) = {
                let state = old.lock();
                let children: Vec<ChildLink> = state
                    .children
                    .iter()
                    .filter(|c| c.key.network != self.fullname)
                    .cloned()
                    .collect();
                let parents: Vec<ParentLink> = state
                    .parents
                    .iter()
                    .filter(|p| p.target.is_foreign())
                    .cloned()
                    .collect();
                (children, parents)
            };
            let Some(variable) = self.lookup(name) else {
                for parent in &parents {
                    if let Err(e) = self.call_link(&parent.target, |h| {
                        h.remove_child(&parent.key.variable, old.key())
                    }) {
                        tracing::warn!(
                            "[BeliefNetwork::parse_string] could not unregister {} from {}: {}",
                            old.key(),
                            parent.key,
                            e
                        );
                    }
                }
                for child in &children {
                    tracing::warn!(
                        "[BeliefNetwork::parse_string] {} lost its parent {}",
                        child.key,
                        old.key()
                    );
                }
                continue;
            };
            if children.is_empty() {
                continue;
            }
            {
                let mut state = variable.lock();
                for child in children {
                    if state.child_index(&child.key).is_none() {
                        state.children.push(ChildLink {
                            message: None,
                            ..child
                        });
                    }
                }
                state.clear_aggregates();
            }
            let token = self.next_token()?;
            self.notify_all_invalid_pi_message(&variable, &token, None);
        }
        Ok(())
    }

    pub fn format_string(&self) -> Result<String, InferenceError> {
        self.check_stale()?;
        codec::format_network(&self.describe())
    }

    pub fn dot_format(&self) -> Result<String, InferenceError> {
        self.check_stale()?;
        codec::dot_format(self)
    }
}

fn check_identifier(name: &str, what: &str) -> Result<(), InferenceError> {
    if name.is_empty()
        || name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '.' | '/' | ':' | '{' | '}' | '"' | '%'))
    {
        return Err(InferenceError::InvalidArgument(format!(
            "invalid {what} name '{name}'"
        )));
    }
    Ok(())
}

fn check_arity(
    name: &str,
    distribution: &Distribution,
    parents: usize,
) -> Result<(), InferenceError> {
    let expected = distribution.parent_count();
    let ok = if distribution.is_conditional() {
        expected == parents
    } else {
        parents == 0
    };
    if !ok {
        return Err(InferenceError::InvalidArgument(format!(
            "variable '{name}' has {parents} parents but its {} expects {expected}",
            distribution.kind()
        )));
    }
    Ok(())
}

fn check_states(
    name: &str,
    var_type: &VariableType,
    distribution: &Distribution,
) -> Result<(), InferenceError> {
    if let (
        VariableType::Discrete {
            states: Some(states),
        },
        Some(cardinality),
    ) = (var_type, distribution.cardinality())
    {
        if states.len() != cardinality {
            return Err(InferenceError::InvalidArgument(format!(
                "variable '{name}' names {} states but its distribution has {cardinality}",
                states.len()
            )));
        }
    }
    Ok(())
}

impl NetworkHandle for BeliefNetwork {
    fn get_name(&self) -> Result<String, InferenceError> {
        self.check_stale()?;
        Ok(self.name.clone())
    }

    fn get_fullname(&self) -> Result<String, InferenceError> {
        self.check_stale()?;
        Ok(self.fullname.clone())
    }

    fn get_variables(&self) -> Result<Vec<String>, InferenceError> {
        self.check_stale()?;
        Ok(self.variable_names())
    }

    fn name_lookup(&self, variable: &str) -> Result<Option<VariableKey>, InferenceError> {
        self.check_stale()?;
        Ok(self.lookup(variable).map(|v| v.key().clone()))
    }

    fn get_posterior(&self, variable: &str) -> Result<Distribution, InferenceError> {
        BeliefNetwork::get_posterior(self, variable)
    }

    fn get_prior(&self, variable: &str) -> Result<Distribution, InferenceError> {
        BeliefNetwork::get_prior(self, variable)
    }

    fn assign_evidence(&self, variable: &str, value: f64) -> Result<(), InferenceError> {
        BeliefNetwork::assign_evidence(self, variable, value)
    }

    fn clear_posterior(&self, variable: &str) -> Result<(), InferenceError> {
        BeliefNetwork::clear_posterior(self, variable)
    }

    fn compute_pi_message(
        &self,
        parent: &str,
        child: &VariableKey,
    ) -> Result<Distribution, InferenceError> {
        BeliefNetwork::compute_pi_message(self, parent, child)
    }

    fn compute_lambda_message(
        &self,
        parent: &VariableKey,
        child: &str,
    ) -> Result<Distribution, InferenceError> {
        BeliefNetwork::compute_lambda_message(self, parent, child)
    }

    fn invalid_pi_message_notification(
        &self,
        child: &str,
        parent: &VariableKey,
        token: &PropagationToken,
    ) -> Result<(), InferenceError> {
        BeliefNetwork::invalid_pi_message_notification(self, child, parent, token)
    }

    fn invalid_lambda_message_notification(
        &self,
        parent: &str,
        child: &VariableKey,
        token: &PropagationToken,
    ) -> Result<(), InferenceError> {
        BeliefNetwork::invalid_lambda_message_notification(self, parent, child, token)
    }

    fn add_child(&self, parent: &str, child: &VariableKey) -> Result<(), InferenceError> {
        BeliefNetwork::add_child(self, parent, child)
    }

    fn remove_child(&self, parent: &str, child: &VariableKey) -> Result<(), InferenceError> {
        BeliefNetwork::remove_child(self, parent, child)
    }

    fn dot_format(&self) -> Result<String, InferenceError> {
        BeliefNetwork::dot_format(self)
    }

    fn format_string(&self) -> Result<String, InferenceError> {
        BeliefNetwork::format_string(self)
    }

    fn parse_string(&self, text: &str) -> Result<(), InferenceError> {
        BeliefNetwork::parse_string(self, text)
    }

    fn ping(&self) -> Result<(), InferenceError> {
        self.check_stale()
    }
}
