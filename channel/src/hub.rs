//! Connection and subscription registry.
//!
//! Every connection owns one bounded outbound queue. Broadcasts enqueue under
//! the registry lock, so each subscriber sees a topic's frames in broadcast
//! order. A connection whose queue is full is dropped rather than allowed to
//! stall everyone else.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::messages::OutboundMessage;
use crate::topic::{TopicSpec, error_frame};
use crate::types::ChannelConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

struct Connection {
    tx: mpsc::Sender<String>,
    topics: HashSet<String>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, Connection>,
    topics: HashMap<String, BTreeSet<ConnectionId>>,
}

impl Registry {
    fn remove(&mut self, id: ConnectionId) -> bool {
        let Some(connection) = self.connections.remove(&id) else {
            return false;
        };
        for topic in connection.topics {
            if let Some(members) = self.topics.get_mut(&topic) {
                members.remove(&id);
                if members.is_empty() {
                    self.topics.remove(&topic);
                }
            }
        }
        true
    }
}

pub struct Hub {
    spec: TopicSpec,
    outbound_capacity: usize,
    registry: Mutex<Registry>,
}

impl Hub {
    #[must_use]
    pub fn new(spec: TopicSpec, config: &ChannelConfig) -> Self {
        Self {
            spec,
            outbound_capacity: config.outbound_capacity.max(1),
            registry: Mutex::new(Registry::default()),
        }
    }

    #[must_use]
    pub fn spec(&self) -> &TopicSpec {
        &self.spec
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection. Frames for it arrive on the returned receiver;
    /// the receiver closes when the hub drops the connection.
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::generate();
        let (tx, rx) = mpsc::channel(self.outbound_capacity);
        self.registry().connections.insert(
            id,
            Connection {
                tx,
                topics: HashSet::new(),
            },
        );
        tracing::debug!(connection = %id, "connection registered");
        (id, rx)
    }

    /// Remove a connection and every subscription it holds.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let removed = self.registry().remove(id);
        if removed {
            tracing::debug!(connection = %id, "connection removed");
        }
        removed
    }

    /// Returns `false` for an unknown connection or a topic outside the
    /// declaration.
    pub fn subscribe(&self, id: ConnectionId, topic: &str) -> bool {
        if self.spec.session_for(topic).is_none() {
            return false;
        }
        let mut registry = self.registry();
        let Some(connection) = registry.connections.get_mut(&id) else {
            return false;
        };
        connection.topics.insert(topic.to_string());
        registry
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(id);
        true
    }

    pub fn unsubscribe(&self, id: ConnectionId, topic: &str) -> bool {
        let mut registry = self.registry();
        let Some(connection) = registry.connections.get_mut(&id) else {
            return false;
        };
        if !connection.topics.remove(topic) {
            return false;
        }
        if let Some(members) = registry.topics.get_mut(topic) {
            members.remove(&id);
            if members.is_empty() {
                registry.topics.remove(topic);
            }
        }
        true
    }

    #[must_use]
    pub fn is_subscribed(&self, id: ConnectionId, topic: &str) -> bool {
        self.registry()
            .topics
            .get(topic)
            .is_some_and(|members| members.contains(&id))
    }

    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry().topics.get(topic).map_or(0, BTreeSet::len)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry().connections.len()
    }

    /// Deliver `message` to every subscriber of its session topic, the
    /// originating connection included. Returns how many queues accepted it.
    /// A message that fails its outbound schema is dropped.
    pub fn broadcast(&self, message: &OutboundMessage) -> usize {
        let frame = match self.spec.encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(session = %message.session, "dropping outbound message: {e}");
                return 0;
            }
        };
        let topic = message.session.topic();

        let mut registry = self.registry();
        let Some(members) = registry.topics.get(&topic) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dropped = Vec::new();
        for id in members {
            let Some(connection) = registry.connections.get(id) else {
                continue;
            };
            match connection.tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(connection = %id, "outbound queue full, disconnecting");
                    dropped.push(*id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dropped.push(*id),
            }
        }
        for id in dropped {
            registry.remove(id);
        }
        delivered
    }

    /// Queue a raw frame for one connection.
    pub fn send_to(&self, id: ConnectionId, frame: String) -> bool {
        let mut registry = self.registry();
        let Some(connection) = registry.connections.get(&id) else {
            return false;
        };
        match connection.tx.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(connection = %id, "dropping connection: {e}");
                registry.remove(id);
                false
            }
        }
    }

    /// Tell one connection its frame was refused. Never broadcast.
    pub fn send_error(&self, id: ConnectionId, topic: Option<&str>, message: &str) -> bool {
        self.send_to(id, error_frame(topic, message))
    }
}
