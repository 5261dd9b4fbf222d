//! The peerstore manager.
//!
//! Watches connectedness events and evicts peers from the peerstore once
//! they have stayed disconnected for a whole grace period. A reconnect
//! within the grace period cancels the pending eviction. Correctness
//! depends on observing the events in the order the swarm emits them,
//! which the event bus guarantees per subscriber.

use crate::eventbus::{Connectedness, Event};
use async_std::task;
use futures::channel::{mpsc, oneshot};
use futures::{FutureExt, StreamExt};
use futures_timer::Delay;
use log::{debug, trace};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use up2p_core::peerstore::PeerStore;
use up2p_core::PeerId;

/// Timing of the eviction machinery.
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// How long a disconnected peer survives in the peerstore.
    pub grace: Duration,
    /// How often pending evictions are swept; defaults to half the grace
    /// period.
    pub interval: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        let grace = Duration::from_secs(60);
        CleanupConfig {
            grace,
            interval: grace / 2,
        }
    }
}

impl CleanupConfig {
    pub fn with_grace(grace: Duration) -> Self {
        CleanupConfig {
            grace,
            interval: grace / 2,
        }
    }
}

/// Handle to a running peerstore manager; dropping it does not stop the
/// manager, [`PeerstoreManager::stop`] does.
pub struct PeerstoreManager {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<task::JoinHandle<()>>,
}

impl PeerstoreManager {
    /// Spawns the manager over a bus subscription.
    pub fn start(events: mpsc::UnboundedReceiver<Event>, peerstore: PeerStore, config: CleanupConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = task::spawn(run(events, peerstore, config, shutdown_rx));
        PeerstoreManager {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Stops the manager, flushing all pending eviction candidates.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.await;
        }
    }
}

async fn run(
    mut events: mpsc::UnboundedReceiver<Event>,
    peerstore: PeerStore,
    config: CleanupConfig,
    shutdown: oneshot::Receiver<()>,
) {
    let mut candidates: HashMap<PeerId, Instant> = HashMap::new();
    let mut shutdown = shutdown.fuse();
    let mut next_sweep = Instant::now() + config.interval;

    loop {
        let timeout = next_sweep.saturating_duration_since(Instant::now());
        let mut sweep = Delay::new(timeout).fuse();
        enum Wake {
            Event(Option<Event>),
            Sweep,
            Shutdown,
        }
        let wake = futures::select! {
            ev = events.next() => Wake::Event(ev),
            _ = sweep => Wake::Sweep,
            _ = shutdown => Wake::Shutdown,
        };
        match wake {
            Wake::Event(Some(Event::PeerConnectednessChanged { peer, connectedness })) => match connectedness {
                Connectedness::Connected => {
                    if candidates.remove(&peer).is_some() {
                        trace!("peer {} reconnected, eviction cancelled", peer);
                    }
                }
                Connectedness::NotConnected => {
                    trace!("peer {} disconnected, eviction pending", peer);
                    candidates.insert(peer, Instant::now());
                }
                _ => {}
            },
            Wake::Event(Some(_)) => {}
            Wake::Event(None) | Wake::Shutdown => {
                // Flush: everything still pending is evicted now.
                for (peer, _) in candidates.drain() {
                    debug!("evicting peer {} (shutdown flush)", peer);
                    peerstore.remove_peer(&peer);
                }
                break;
            }
            Wake::Sweep => {
                let now = Instant::now();
                next_sweep = now + config.interval;
                let grace = config.grace;
                let expired: Vec<PeerId> = candidates
                    .iter()
                    .filter(|(_, &at)| now.duration_since(at) >= grace)
                    .map(|(peer, _)| peer.clone())
                    .collect();
                for peer in expired {
                    debug!("evicting peer {} after grace period", peer);
                    candidates.remove(&peer);
                    peerstore.remove_peer(&peer);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventbus::EventBus;

    fn connect_event(peer: &PeerId, connectedness: Connectedness) -> Event {
        Event::PeerConnectednessChanged {
            peer: peer.clone(),
            connectedness,
        }
    }

    #[async_std::test]
    async fn eviction_after_grace() {
        let bus = EventBus::new();
        let peerstore = PeerStore::default();
        let peer = PeerId::random();
        peerstore.add_addr(&peer, "/memory/1".parse().unwrap(), Duration::from_secs(600));

        let manager = PeerstoreManager::start(
            bus.subscribe(),
            peerstore.clone(),
            CleanupConfig {
                grace: Duration::from_millis(100),
                interval: Duration::from_millis(50),
            },
        );

        bus.publish(connect_event(&peer, Connectedness::Connected));
        bus.publish(connect_event(&peer, Connectedness::NotConnected));

        task::sleep(Duration::from_millis(300)).await;
        assert!(peerstore.get_addrs(&peer).is_none(), "peer should have been evicted");
        manager.stop().await;
    }

    #[async_std::test]
    async fn reconnect_cancels_eviction() {
        let bus = EventBus::new();
        let peerstore = PeerStore::default();
        let peer = PeerId::random();
        peerstore.add_addr(&peer, "/memory/2".parse().unwrap(), Duration::from_secs(600));

        let manager = PeerstoreManager::start(
            bus.subscribe(),
            peerstore.clone(),
            CleanupConfig {
                grace: Duration::from_millis(200),
                interval: Duration::from_millis(50),
            },
        );

        bus.publish(connect_event(&peer, Connectedness::NotConnected));
        task::sleep(Duration::from_millis(80)).await;
        bus.publish(connect_event(&peer, Connectedness::Connected));
        task::sleep(Duration::from_millis(400)).await;

        assert!(peerstore.get_addrs(&peer).is_some(), "reconnect must cancel the eviction");
        manager.stop().await;
    }
}
