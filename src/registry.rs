//! Connected subscribers and their regions of interest.

use crate::bounds::GeographicBounds;
use crate::protocol::ServerMessage;
use crate::types::SubscriberId;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Outbound message channel of one subscriber.
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

#[derive(Debug)]
struct Subscriber {
    outbox: Outbox,
    bounds: Option<GeographicBounds>,
}

/// Tracks connected subscribers. No operation fails; unknown ids are ignored.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    subscribers: HashMap<SubscriberId, Subscriber>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Re-adding an id replaces its outbox and clears its bounds.
    pub fn add(&mut self, id: SubscriberId, outbox: Outbox) {
        self.subscribers.insert(
            id,
            Subscriber {
                outbox,
                bounds: None,
            },
        );
    }

    /// Remove a subscriber together with its bounds. Returns whether it existed.
    pub fn remove(&mut self, id: SubscriberId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Replace a subscriber's region. Returns whether the id was known.
    pub fn set_bounds(&mut self, id: SubscriberId, bounds: GeographicBounds) -> bool {
        match self.subscribers.get_mut(&id) {
            Some(sub) => {
                sub.bounds = Some(bounds);
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Regions of all subscribers that declared one.
    pub fn all_bounds(&self) -> Vec<GeographicBounds> {
        self.subscribers.values().filter_map(|s| s.bounds).collect()
    }

    /// Deliver to one subscriber. Returns false if unknown or disconnected.
    pub fn send_to(&self, id: SubscriberId, msg: ServerMessage) -> bool {
        self.subscribers
            .get(&id)
            .is_some_and(|s| s.outbox.send(msg).is_ok())
    }

    /// Deliver to everyone, returning the ids whose channel is closed.
    pub fn publish(&self, msg: &ServerMessage) -> Vec<SubscriberId> {
        self.subscribers
            .iter()
            .filter(|(_, s)| s.outbox.send(msg.clone()).is_err())
            .map(|(id, _)| *id)
            .collect()
    }
}
