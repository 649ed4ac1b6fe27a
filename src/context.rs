//! The registry every network is created in.
//!
//! A [`Context`] binds networks under its registry location (`host:port`), resolves names of
//! networks published elsewhere through its [`Transport`], and hands out the propagation
//! tokens that keep invalidation waves from revisiting a slot. Contexts are independent of
//! each other, so several can share one process and one [`LoopbackTransport`] to stand in for
//! separate hosts.
use crate::{
    codec::{self, NetworkDescription},
    config::EngineConfig,
    error::InferenceError,
    nameinfo::NameInfo,
    network::{
        BeliefNetwork, LinkTarget, LoopbackTransport, NetworkHandle, NetworkKind, PeerStatus,
        PropagationToken, RemotePeer, Transport,
    },
    strategy::StrategyRegistry,
};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    fmt::{Debug, Formatter},
    fs::read_to_string,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

pub struct Context {
    config: EngineConfig,
    registry: StrategyRegistry,
    transport: Arc<dyn Transport>,
    networks: RwLock<HashMap<String, Arc<BeliefNetwork>>>,
    peers: RwLock<HashMap<String, Arc<RemotePeer>>>,
    token_seq: AtomicU64,
    me: Weak<Context>,
}

impl Debug for Context {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("location", &self.location())
            .field("networks", &self.network_names())
            .finish()
    }
}

impl Context {
    /// A context with its own private loopback transport.
    pub fn new(config: EngineConfig) -> Result<Arc<Context>, InferenceError> {
        Context::with_transport(config, LoopbackTransport::new())
    }

    pub fn with_transport(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Context>, InferenceError> {
        config.validate()?;
        let registry = StrategyRegistry::create()?;
        Ok(Arc::new_cyclic(|me| Context {
            config,
            registry,
            transport,
            networks: RwLock::new(HashMap::new()),
            peers: RwLock::new(HashMap::new()),
            token_seq: AtomicU64::new(0),
            me: me.clone(),
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// `host:port`
    pub fn location(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    pub(crate) fn next_token(&self) -> PropagationToken {
        PropagationToken {
            origin: self.location(),
            seq: self.token_seq.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    /// A new, unbound network under this context's location.
    pub fn create_network(
        &self,
        name: &str,
        kind: NetworkKind,
    ) -> Result<Arc<BeliefNetwork>, InferenceError> {
        BeliefNetwork::new(
            name,
            kind,
            self.me.clone(),
            &self.config.host,
            self.config.port,
        )
    }

    /// Make `network` reachable by name. Fails if the name is taken.
    pub fn bind(&self, network: &Arc<BeliefNetwork>) -> Result<(), InferenceError> {
        self.check_owned(network)?;
        {
            let mut networks = self.networks.write();
            if networks.contains_key(network.name()) {
                return Err(InferenceError::InvalidArgument(format!(
                    "{} is already bound",
                    network.fullname()
                )));
            }
            networks.insert(network.name().to_string(), network.clone());
        }
        self.transport.publish(network.fullname(), network)?;
        tracing::info!("[Context::bind] bound {}", network.fullname());
        Ok(())
    }

    /// Bind `network`, replacing and decommissioning any network bound under its name.
    pub fn rebind(
        &self,
        network: &Arc<BeliefNetwork>,
    ) -> Result<Option<Arc<BeliefNetwork>>, InferenceError> {
        self.check_owned(network)?;
        let displaced = self
            .networks
            .write()
            .insert(network.name().to_string(), network.clone());
        self.transport.publish(network.fullname(), network)?;
        if let Some(old) = &displaced {
            if !Arc::ptr_eq(old, network) {
                old.mark_stale();
            }
        }
        tracing::info!("[Context::rebind] bound {}", network.fullname());
        Ok(displaced)
    }

    pub fn unbind(&self, name: &str) -> Result<Arc<BeliefNetwork>, InferenceError> {
        let network = self.networks.write().remove(name).ok_or_else(|| {
            InferenceError::UnknownNetwork(format!("{}/{name}", self.location()))
        })?;
        self.transport.withdraw(network.fullname());
        tracing::info!("[Context::unbind] unbound {}", network.fullname());
        Ok(network)
    }

    fn check_owned(&self, network: &BeliefNetwork) -> Result<(), InferenceError> {
        network.check_stale()?;
        let owned = network
            .context()
            .is_ok_and(|ctx| std::ptr::eq(Arc::as_ptr(&ctx), self));
        if !owned {
            return Err(InferenceError::InvalidArgument(format!(
                "{} was created in another context",
                network.fullname()
            )));
        }
        Ok(())
    }

    /// A network bound in this context.
    pub fn network(&self, name: &str) -> Result<Arc<BeliefNetwork>, InferenceError> {
        self.networks.read().get(name).cloned().ok_or_else(|| {
            InferenceError::UnknownNetwork(format!("{}/{name}", self.location()))
        })
    }

    pub fn network_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.networks.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Handle to the network at `location`, local or remote.
    ///
    /// A local name that is not bound yet is loaded from the search path.
    pub fn get_reference(
        &self,
        location: &NameInfo,
    ) -> Result<Arc<dyn NetworkHandle>, InferenceError> {
        match self.link_to(location)? {
            LinkTarget::Local(weak) => match weak.upgrade() {
                Some(network) => Ok(network),
                None => Err(InferenceError::StaleReference(location.network_fullname())),
            },
            LinkTarget::Remote(peer) => Ok(peer),
            LinkTarget::SameNetwork | LinkTarget::Unresolved => Err(
                InferenceError::UnknownNetwork(location.network_fullname()),
            ),
        }
    }

    /// [`Context::get_reference`] for a textual `[host[:port]/]network` name.
    pub fn get_reference_by_name(
        &self,
        name: &str,
    ) -> Result<Arc<dyn NetworkHandle>, InferenceError> {
        let location = NameInfo::parse(name, &self.config.host, self.config.port)?;
        self.get_reference(&location)
    }

    pub(crate) fn link_to(&self, location: &NameInfo) -> Result<LinkTarget, InferenceError> {
        if location.is_at(&self.config.host, self.config.port) {
            let network = match self.network(&location.network) {
                Ok(network) => network,
                Err(InferenceError::UnknownNetwork(_)) => {
                    tracing::debug!(
                        "[Context::link_to] {} is not bound, loading it",
                        location.network_fullname()
                    );
                    self.load_network(&location.network)?
                }
                Err(e) => return Err(e),
            };
            network.check_stale()?;
            return Ok(LinkTarget::Local(Arc::downgrade(&network)));
        }
        let fullname = location.network_fullname();
        if let Some(peer) = self.peers.read().get(&fullname) {
            if peer.status() != PeerStatus::Disconnected {
                return Ok(LinkTarget::Remote(peer.clone()));
            }
        }
        let peer = RemotePeer::connect(
            location,
            self.transport.clone(),
            self.config.reconnect.clone(),
        )?;
        self.peers.write().insert(fullname, peer.clone());
        Ok(LinkTarget::Remote(peer))
    }

    /// Parse a network description, bind it and resolve its references.
    pub fn parse_network(&self, text: &str) -> Result<Arc<BeliefNetwork>, InferenceError> {
        let description = codec::parse_network(text)?;
        self.build_network(&description)
    }

    pub fn build_network(
        &self,
        description: &NetworkDescription,
    ) -> Result<Arc<BeliefNetwork>, InferenceError> {
        let network = self.create_network(&description.name, description.kind)?;
        network.load_description(description)?;
        self.bind(&network)?;
        if let Err(e) = network.assign_references() {
            tracing::warn!(
                "[Context::build_network] unbinding {}: {}",
                network.fullname(),
                e
            );
            self.unbind(network.name())?;
            network.mark_stale();
            return Err(e);
        }
        Ok(network)
    }

    /// Bound network `name`, or the first `<dir>/<name>.bnet` on the search path.
    pub fn load_network(&self, name: &str) -> Result<Arc<BeliefNetwork>, InferenceError> {
        if let Ok(network) = self.network(name) {
            tracing::debug!("[Context::load_network] {} already bound", network.fullname());
            return Ok(network);
        }
        for dir in &self.config.search_path {
            let path = dir.join(format!("{name}.bnet"));
            if !path.is_file() {
                continue;
            }
            tracing::debug!("[Context::load_network] Attempting to read {:?}", path);
            let description = codec::parse_network(&read_to_string(&path)?)?;
            if description.name != name {
                return Err(InferenceError::InvalidArgument(format!(
                    "{path:?} describes network '{}', expected '{name}'",
                    description.name
                )));
            }
            return self.build_network(&description);
        }
        Err(InferenceError::NotFound(format!(
            "{name}.bnet on search path {:?}",
            self.config.search_path
        )))
    }

    /// Decommission every bound network and forget all peers.
    pub fn teardown(&self) {
        let networks: Vec<_> = self.networks.write().drain().map(|(_, n)| n).collect();
        for network in networks {
            self.transport.withdraw(network.fullname());
            network.mark_stale();
        }
        self.peers.write().clear();
        tracing::info!("[Context::teardown] {} torn down", self.location());
    }
}
