//! The remote-callable network surface and the links that carry it.
//!
//! [`NetworkHandle`] is everything one network may ask of another. It is implemented by
//! [`BeliefNetwork`] itself and by whatever a [`Transport`] hands back for a remote location.
//! A [`RemotePeer`] wraps such a handle with connection status and the reconnect policy.
use super::{BeliefNetwork, PropagationToken};
use crate::{
    config::ReconnectPolicy, distribution::Distribution, error::InferenceError,
    nameinfo::{NameInfo, VariableKey},
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    fmt::{Debug, Formatter},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    },
    thread,
    time::Instant,
};

pub trait NetworkHandle: Send + Sync {
    fn get_name(&self) -> Result<String, InferenceError>;
    fn get_fullname(&self) -> Result<String, InferenceError>;
    fn get_variables(&self) -> Result<Vec<String>, InferenceError>;
    /// The key of `variable` if this network has it.
    fn name_lookup(&self, variable: &str) -> Result<Option<VariableKey>, InferenceError>;
    fn get_posterior(&self, variable: &str) -> Result<Distribution, InferenceError>;
    fn get_prior(&self, variable: &str) -> Result<Distribution, InferenceError>;
    fn assign_evidence(&self, variable: &str, value: f64) -> Result<(), InferenceError>;
    fn clear_posterior(&self, variable: &str) -> Result<(), InferenceError>;
    /// Pi message from local `parent` to `child`.
    fn compute_pi_message(
        &self,
        parent: &str,
        child: &VariableKey,
    ) -> Result<Distribution, InferenceError>;
    /// Lambda message from local `child` to `parent`.
    fn compute_lambda_message(
        &self,
        parent: &VariableKey,
        child: &str,
    ) -> Result<Distribution, InferenceError>;
    fn invalid_pi_message_notification(
        &self,
        child: &str,
        parent: &VariableKey,
        token: &PropagationToken,
    ) -> Result<(), InferenceError>;
    fn invalid_lambda_message_notification(
        &self,
        parent: &str,
        child: &VariableKey,
        token: &PropagationToken,
    ) -> Result<(), InferenceError>;
    fn add_child(&self, parent: &str, child: &VariableKey) -> Result<(), InferenceError>;
    fn remove_child(&self, parent: &str, child: &VariableKey) -> Result<(), InferenceError>;
    fn dot_format(&self) -> Result<String, InferenceError>;
    fn format_string(&self) -> Result<String, InferenceError>;
    fn parse_string(&self, text: &str) -> Result<(), InferenceError>;
    fn ping(&self) -> Result<(), InferenceError>;
}

/// Where the other end of an edge lives.
#[derive(Clone)]
pub enum LinkTarget {
    SameNetwork,
    /// Another network registered in the same context.
    Local(Weak<BeliefNetwork>),
    Remote(Arc<RemotePeer>),
    /// Not resolved, or dropped after a link failure.
    Unresolved,
}

impl LinkTarget {
    pub fn is_unresolved(&self) -> bool {
        matches!(self, LinkTarget::Unresolved)
    }

    /// True when the other end lives in a different network.
    pub fn is_foreign(&self) -> bool {
        matches!(self, LinkTarget::Local(_) | LinkTarget::Remote(_))
    }
}

impl Debug for LinkTarget {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            LinkTarget::SameNetwork => write!(f, "SameNetwork"),
            LinkTarget::Local(weak) => match weak.upgrade() {
                Some(network) => write!(f, "Local({})", network.fullname()),
                None => write!(f, "Local(<dropped>)"),
            },
            LinkTarget::Remote(peer) => write!(f, "Remote({})", peer.fullname()),
            LinkTarget::Unresolved => write!(f, "Unresolved"),
        }
    }
}

/// Carries calls to networks published under another registry location.
pub trait Transport: Send + Sync {
    fn connect(&self, location: &NameInfo) -> Result<Arc<dyn NetworkHandle>, InferenceError>;
    fn publish(&self, fullname: &str, network: &Arc<BeliefNetwork>) -> Result<(), InferenceError>;
    fn withdraw(&self, fullname: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    Connected,
    Reconnecting,
    Disconnected,
}

/// A connection to a network under another registry location.
pub struct RemotePeer {
    location: NameInfo,
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    connection: RwLock<Option<Arc<dyn NetworkHandle>>>,
    status: RwLock<PeerStatus>,
    last_seen: Mutex<Option<Instant>>,
}

impl Debug for RemotePeer {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.debug_struct("RemotePeer")
            .field("location", &self.location)
            .field("status", &*self.status.read())
            .finish()
    }
}

impl RemotePeer {
    pub fn connect(
        location: &NameInfo,
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
    ) -> Result<Arc<RemotePeer>, InferenceError> {
        let location = location.network_only();
        let handle = transport.connect(&location)?;
        handle.ping()?;
        tracing::debug!("[RemotePeer::connect] connected to {}", location);
        Ok(Arc::new(RemotePeer {
            location,
            transport,
            policy,
            connection: RwLock::new(Some(handle)),
            status: RwLock::new(PeerStatus::Connected),
            last_seen: Mutex::new(Some(Instant::now())),
        }))
    }

    pub fn fullname(&self) -> String {
        self.location.network_fullname()
    }

    pub fn location(&self) -> &NameInfo {
        &self.location
    }

    pub fn status(&self) -> PeerStatus {
        *self.status.read()
    }

    pub fn last_seen(&self) -> Option<Instant> {
        *self.last_seen.lock()
    }

    pub fn health_check(&self) -> Result<(), InferenceError> {
        self.call(|handle| handle.ping())
    }

    /// Run `op` against the peer, reconnecting per the policy on transport failure.
    ///
    /// Errors other than transport failures are returned as-is without retrying.
    pub fn call<T>(
        &self,
        op: impl Fn(&dyn NetworkHandle) -> Result<T, InferenceError>,
    ) -> Result<T, InferenceError> {
        let current = self.connection.read().clone();
        let mut last_error = match current {
            Some(handle) => match op(&*handle) {
                Err(e) if e.is_transport() => e,
                other => return self.observe(other),
            },
            None => InferenceError::transport(self.fullname(), "not connected"),
        };

        *self.status.write() = PeerStatus::Reconnecting;
        for attempt in 1..=self.policy.max_attempts {
            let delay = self.policy.backoff.delay_for(attempt);
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            tracing::debug!(
                "[RemotePeer::call] reconnect attempt {}/{} to {}",
                attempt,
                self.policy.max_attempts,
                self.location
            );
            let handle = match self.transport.connect(&self.location) {
                Ok(handle) => handle,
                Err(e) => {
                    last_error = InferenceError::transport(self.fullname(), e.to_string());
                    continue;
                }
            };
            *self.connection.write() = Some(handle.clone());
            match op(&*handle) {
                Err(e) if e.is_transport() => last_error = e,
                other => {
                    *self.status.write() = PeerStatus::Connected;
                    return self.observe(other);
                }
            }
        }

        tracing::warn!(
            "[RemotePeer::call] giving up on {} after {} attempts: {}",
            self.location,
            self.policy.max_attempts,
            last_error
        );
        *self.connection.write() = None;
        *self.status.write() = PeerStatus::Disconnected;
        Err(last_error)
    }

    fn observe<T>(&self, result: Result<T, InferenceError>) -> Result<T, InferenceError> {
        if result.is_ok() {
            *self.last_seen.lock() = Some(Instant::now());
        }
        result
    }
}

impl NetworkHandle for RemotePeer {
    fn get_name(&self) -> Result<String, InferenceError> {
        self.call(|h| h.get_name())
    }

    fn get_fullname(&self) -> Result<String, InferenceError> {
        self.call(|h| h.get_fullname())
    }

    fn get_variables(&self) -> Result<Vec<String>, InferenceError> {
        self.call(|h| h.get_variables())
    }

    fn name_lookup(&self, variable: &str) -> Result<Option<VariableKey>, InferenceError> {
        self.call(|h| h.name_lookup(variable))
    }

    fn get_posterior(&self, variable: &str) -> Result<Distribution, InferenceError> {
        self.call(|h| h.get_posterior(variable))
    }

    fn get_prior(&self, variable: &str) -> Result<Distribution, InferenceError> {
        self.call(|h| h.get_prior(variable))
    }

    fn assign_evidence(&self, variable: &str, value: f64) -> Result<(), InferenceError> {
        self.call(|h| h.assign_evidence(variable, value))
    }

    fn clear_posterior(&self, variable: &str) -> Result<(), InferenceError> {
        self.call(|h| h.clear_posterior(variable))
    }

    fn compute_pi_message(
        &self,
        parent: &str,
        child: &VariableKey,
    ) -> Result<Distribution, InferenceError> {
        self.call(|h| h.compute_pi_message(parent, child))
    }

    fn compute_lambda_message(
        &self,
        parent: &VariableKey,
        child: &str,
    ) -> Result<Distribution, InferenceError> {
        self.call(|h| h.compute_lambda_message(parent, child))
    }

    fn invalid_pi_message_notification(
        &self,
        child: &str,
        parent: &VariableKey,
        token: &PropagationToken,
    ) -> Result<(), InferenceError> {
        self.call(|h| h.invalid_pi_message_notification(child, parent, token))
    }

    fn invalid_lambda_message_notification(
        &self,
        parent: &str,
        child: &VariableKey,
        token: &PropagationToken,
    ) -> Result<(), InferenceError> {
        self.call(|h| h.invalid_lambda_message_notification(parent, child, token))
    }

    fn add_child(&self, parent: &str, child: &VariableKey) -> Result<(), InferenceError> {
        self.call(|h| h.add_child(parent, child))
    }

    fn remove_child(&self, parent: &str, child: &VariableKey) -> Result<(), InferenceError> {
        self.call(|h| h.remove_child(parent, child))
    }

    fn dot_format(&self) -> Result<String, InferenceError> {
        self.call(|h| h.dot_format())
    }

    fn format_string(&self) -> Result<String, InferenceError> {
        self.call(|h| h.format_string())
    }

    fn parse_string(&self, text: &str) -> Result<(), InferenceError> {
        self.call(|h| h.parse_string(text))
    }

    fn ping(&self) -> Result<(), InferenceError> {
        self.health_check()
    }
}

/// In-process transport: every registry location is a key in one shared table.
///
/// Endpoints can be severed to simulate an unreachable peer.
#[derive(Default)]
pub struct LoopbackTransport {
    endpoints: RwLock<HashMap<String, Weak<BeliefNetwork>>>,
    severed: Arc<RwLock<HashSet<String>>>,
    connects: AtomicUsize,
}

impl LoopbackTransport {
    pub fn new() -> Arc<LoopbackTransport> {
        Arc::new(LoopbackTransport::default())
    }

    /// Make every call to `fullname` fail with a transport error until restored.
    pub fn sever(&self, fullname: &str) {
        tracing::info!("[LoopbackTransport::sever] {}", fullname);
        self.severed.write().insert(fullname.to_string());
    }

    pub fn restore(&self, fullname: &str) {
        self.severed.write().remove(fullname);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<String> {
        let mut names: Vec<String> = self.endpoints.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Transport for LoopbackTransport {
    fn connect(&self, location: &NameInfo) -> Result<Arc<dyn NetworkHandle>, InferenceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let fullname = location.network_fullname();
        if self.severed.read().contains(&fullname) {
            return Err(InferenceError::transport(&fullname, "connection refused"));
        }
        let target = self
            .endpoints
            .read()
            .get(&fullname)
            .cloned()
            .ok_or_else(|| InferenceError::UnknownNetwork(fullname.clone()))?;
        Ok(Arc::new(LoopbackHandle {
            fullname,
            target,
            severed: self.severed.clone(),
        }))
    }

    fn publish(&self, fullname: &str, network: &Arc<BeliefNetwork>) -> Result<(), InferenceError> {
        self.endpoints
            .write()
            .insert(fullname.to_string(), Arc::downgrade(network));
        Ok(())
    }

    fn withdraw(&self, fullname: &str) {
        self.endpoints.write().remove(fullname);
    }
}

struct LoopbackHandle {
    fullname: String,
    target: Weak<BeliefNetwork>,
    severed: Arc<RwLock<HashSet<String>>>,
}

impl LoopbackHandle {
    fn with_target<T>(
        &self,
        op: impl FnOnce(&BeliefNetwork) -> Result<T, InferenceError>,
    ) -> Result<T, InferenceError> {
        if self.severed.read().contains(&self.fullname) {
            return Err(InferenceError::transport(&self.fullname, "connection reset"));
        }
        match self.target.upgrade() {
            Some(network) => op(&network),
            None => Err(InferenceError::transport(&self.fullname, "endpoint closed")),
        }
    }
}

impl NetworkHandle for LoopbackHandle {
    fn get_name(&self) -> Result<String, InferenceError> {
        self.with_target(|n| n.get_name())
    }

    fn get_fullname(&self) -> Result<String, InferenceError> {
        self.with_target(|n| n.get_fullname())
    }

    fn get_variables(&self) -> Result<Vec<String>, InferenceError> {
        self.with_target(|n| n.get_variables())
    }

    fn name_lookup(&self, variable: &str) -> Result<Option<VariableKey>, InferenceError> {
        self.with_target(|n| n.name_lookup(variable))
    }

    fn get_posterior(&self, variable: &str) -> Result<Distribution, InferenceError> {
        self.with_target(|n| n.get_posterior(variable))
    }

    fn get_prior(&self, variable: &str) -> Result<Distribution, InferenceError> {
        self.with_target(|n| n.get_prior(variable))
    }

    fn assign_evidence(&self, variable: &str, value: f64) -> Result<(), InferenceError> {
        self.with_target(|n| n.assign_evidence(variable, value))
    }

    fn clear_posterior(&self, variable: &str) -> Result<(), InferenceError> {
        self.with_target(|n| n.clear_posterior(variable))
    }

    fn compute_pi_message(
        &self,
        parent: &str,
        child: &VariableKey,
    ) -> Result<Distribution, InferenceError> {
        self.with_target(|n| n.compute_pi_message(parent, child))
    }

    fn compute_lambda_message(
        &self,
        parent: &VariableKey,
        child: &str,
    ) -> Result<Distribution, InferenceError> {
        self.with_target(|n| n.compute_lambda_message(parent, child))
    }

    fn invalid_pi_message_notification(
        &self,
        child: &str,
        parent: &VariableKey,
        token: &PropagationToken,
    ) -> Result<(), InferenceError> {
        self.with_target(|n| n.invalid_pi_message_notification(child, parent, token))
    }

    fn invalid_lambda_message_notification(
        &self,
        parent: &str,
        child: &VariableKey,
        token: &PropagationToken,
    ) -> Result<(), InferenceError> {
        self.with_target(|n| n.invalid_lambda_message_notification(parent, child, token))
    }

    fn add_child(&self, parent: &str, child: &VariableKey) -> Result<(), InferenceError> {
        self.with_target(|n| n.add_child(parent, child))
    }

    fn remove_child(&self, parent: &str, child: &VariableKey) -> Result<(), InferenceError> {
        self.with_target(|n| n.remove_child(parent, child))
    }

    fn dot_format(&self) -> Result<String, InferenceError> {
        self.with_target(|n| n.dot_format())
    }

    fn format_string(&self) -> Result<String, InferenceError> {
        self.with_target(|n| n.format_string())
    }

    fn parse_string(&self, text: &str) -> Result<(), InferenceError> {
        self.with_target(|n| n.parse_string(text))
    }

    fn ping(&self) -> Result<(), InferenceError> {
        self.with_target(|n| n.ping())
    }
}
