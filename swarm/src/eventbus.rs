//! In-process publish/subscribe of swarm events.
//!
//! Subscribers get their own unbounded channel; publishing never blocks
//! and silently forgets subscribers that went away.

use futures::channel::mpsc;
use parking_lot::Mutex;
use std::sync::Arc;
use up2p_core::{Multiaddr, PeerId};

/// Coarse peer-reachability state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Connectedness {
    /// Has at least one live connection.
    Connected,
    /// No connection, but dialing is expected to succeed.
    CanConnect,
    /// A recent dial attempt failed.
    CannotConnect,
    /// No connection and nothing known either way.
    NotConnected,
}

/// The events the swarm publishes for its collaborators.
#[derive(Clone, Debug)]
pub enum Event {
    PeerConnectednessChanged {
        peer: PeerId,
        connectedness: Connectedness,
    },
    LocalAddressesUpdated(Vec<Multiaddr>),
}

/// The bus itself. Cloning shares the subscriber list.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<Event>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    /// Registers a new subscriber.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Delivers `event` to every live subscriber, in publish order.
    pub fn publish(&self, event: Event) {
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn events_reach_every_subscriber_in_order() {
        let bus = EventBus::new();
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let peer = PeerId::random();
        bus.publish(Event::PeerConnectednessChanged {
            peer: peer.clone(),
            connectedness: Connectedness::Connected,
        });
        bus.publish(Event::PeerConnectednessChanged {
            peer,
            connectedness: Connectedness::NotConnected,
        });

        futures::executor::block_on(async move {
            for sub in [&mut sub1, &mut sub2].iter_mut() {
                match sub.next().await {
                    Some(Event::PeerConnectednessChanged { connectedness, .. }) => {
                        assert_eq!(connectedness, Connectedness::Connected)
                    }
                    other => panic!("unexpected event: {:?}", other),
                }
                match sub.next().await {
                    Some(Event::PeerConnectednessChanged { connectedness, .. }) => {
                        assert_eq!(connectedness, Connectedness::NotConnected)
                    }
                    other => panic!("unexpected event: {:?}", other),
                }
            }
        });
    }

    #[test]
    fn dropped_subscribers_are_forgotten() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        drop(sub);
        bus.publish(Event::LocalAddressesUpdated(vec![]));
        assert!(bus.subscribers.lock().is_empty());
    }
}
