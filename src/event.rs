use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Which cached quantity of a variable changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventSlot {
    Pi,
    Lambda,
    Posterior,
    Evidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotChange {
    Computed,
    Invalidated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEvent {
    /// Fullname of the owning network.
    pub network: String,
    pub variable: String,
    pub slot: EventSlot,
    pub change: SlotChange,
    /// Generation of the variable when the event was emitted.
    pub generation: u64,
}

impl Display for NodeEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}.{} {:?} {:?} @{}",
            self.network, self.variable, self.slot, self.change, self.generation
        )
    }
}

struct Subscriber {
    variable: Option<String>,
    sender: UnboundedSender<NodeEvent>,
}

/// Observer fan-out for one network.
///
/// Delivery goes through unbounded channels so the triggering operation never waits on an
/// observer. Subscribers whose receiver was dropped are pruned on the next send.
#[derive(Default)]
pub struct ObserverSet {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl ObserverSet {
    /// Receive events for one variable, or for every variable if `variable` is `None`.
    pub fn subscribe(&self, variable: Option<&str>) -> UnboundedReceiver<NodeEvent> {
        let (sender, receiver) = unbounded_channel();
        self.subscribers.lock().push(Subscriber {
            variable: variable.map(str::to_string),
            sender,
        });
        receiver
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    pub fn notify(&self, event: NodeEvent) {
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        subscribers.retain(|sub| {
            if sub
                .variable
                .as_ref()
                .is_some_and(|v| *v != event.variable)
            {
                return true;
            }
            match sub.sender.send(event.clone()) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(
                        "[ObserverSet::notify] dropping observer, could not deliver {}",
                        e.0
                    );
                    false
                }
            }
        });
    }
}
