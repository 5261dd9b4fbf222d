//! Book-keeping about known peers: their addresses, keys and protocols.

use crate::{Multiaddr, PeerId, PublicKey};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default time-to-live for an address learned from a dial or a listener.
pub const ADDRESS_TTL: Duration = Duration::from_secs(60 * 60);

/// A record of the peers we know about.
///
/// Cloning is shallow; all clones observe the same books. Mutations take a
/// single short-lived lock, reads prune expired address records in place.
#[derive(Clone, Default)]
pub struct PeerStore {
    inner: Arc<Mutex<Books>>,
}

#[derive(Default)]
struct Books {
    addrs: AddrBook,
    keys: KeyBook,
    protos: ProtoBook,
}

impl fmt::Debug for PeerStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let books = self.inner.lock();
        f.debug_struct("PeerStore")
            .field("addrs", &books.addrs)
            .field("keys", &books.keys.book.len())
            .field("protos", &books.protos.book.len())
            .finish()
    }
}

impl PeerStore {
    /// Adds an address for a peer, refreshing its TTL if already known.
    pub fn add_addr(&self, peer_id: &PeerId, addr: Multiaddr, ttl: Duration) {
        self.inner.lock().addrs.add_addr(peer_id, addr, ttl)
    }

    /// Adds several addresses for a peer.
    pub fn add_addrs(&self, peer_id: &PeerId, addrs: Vec<Multiaddr>, ttl: Duration) {
        let mut books = self.inner.lock();
        for addr in addrs {
            books.addrs.add_addr(peer_id, addr, ttl);
        }
    }

    /// The currently live addresses of a peer. Expired records are dropped.
    pub fn get_addrs(&self, peer_id: &PeerId) -> Option<Vec<Multiaddr>> {
        self.inner.lock().addrs.get_addrs(peer_id)
    }

    /// Stores the public key of a peer.
    pub fn add_key(&self, peer_id: &PeerId, key: PublicKey) {
        self.inner.lock().keys.book.insert(peer_id.clone(), key);
    }

    /// The public key of a peer, if known.
    pub fn get_key(&self, peer_id: &PeerId) -> Option<PublicKey> {
        self.inner.lock().keys.book.get(peer_id).cloned()
    }

    /// Records the protocols a peer supports.
    pub fn add_protocols(&self, peer_id: &PeerId, protos: Vec<String>) {
        let book = &mut self.inner.lock().protos.book;
        let entry = book.entry(peer_id.clone()).or_default();
        for proto in protos {
            if !entry.contains(&proto) {
                entry.push(proto);
            }
        }
    }

    /// The known protocols of a peer.
    pub fn get_protocols(&self, peer_id: &PeerId) -> Option<Vec<String>> {
        self.inner.lock().protos.book.get(peer_id).map(|v| v.to_vec())
    }

    /// The first of `protos` the peer is known to support.
    pub fn first_supported_protocol(&self, peer_id: &PeerId, protos: Vec<String>) -> Option<String> {
        let books = self.inner.lock();
        let known = books.protos.book.get(peer_id)?;
        protos.into_iter().find(|p| known.contains(p))
    }

    /// Removes every record of a peer.
    pub fn remove_peer(&self, peer_id: &PeerId) {
        let mut books = self.inner.lock();
        books.addrs.book.remove(peer_id);
        books.keys.book.remove(peer_id);
        books.protos.book.remove(peer_id);
    }

    /// All peers with at least one live address.
    pub fn peers(&self) -> Vec<PeerId> {
        self.inner.lock().addrs.book.keys().cloned().collect()
    }
}

#[derive(Default)]
struct AddrBook {
    book: FnvHashMap<PeerId, SmallVec<[AddrRecord; 4]>>,
}

struct AddrRecord {
    addr: Multiaddr,
    expiry: Instant,
}

impl fmt::Debug for AddrBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AddrBook").field(&self.book.len()).finish()
    }
}

impl AddrBook {
    fn add_addr(&mut self, peer_id: &PeerId, addr: Multiaddr, ttl: Duration) {
        let expiry = Instant::now() + ttl;
        if let Some(entry) = self.book.get_mut(peer_id) {
            if let Some(record) = entry.iter_mut().find(|r| r.addr == addr) {
                record.expiry = expiry;
            } else {
                entry.push(AddrRecord { addr, expiry });
            }
        } else {
            let mut records = SmallVec::new();
            records.push(AddrRecord { addr, expiry });
            self.book.insert(peer_id.clone(), records);
        }
    }

    fn get_addrs(&mut self, peer_id: &PeerId) -> Option<Vec<Multiaddr>> {
        let now = Instant::now();
        let entry = self.book.get_mut(peer_id)?;
        entry.retain(|r| r.expiry > now);
        if entry.is_empty() {
            self.book.remove(peer_id);
            return None;
        }
        Some(entry.iter().map(|r| r.addr.clone()).collect())
    }
}

#[derive(Default)]
struct KeyBook {
    book: FnvHashMap<PeerId, PublicKey>,
}

#[derive(Default)]
struct ProtoBook {
    book: FnvHashMap<PeerId, SmallVec<[String; 4]>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;

    #[test]
    fn addr_book_basic() {
        let store = PeerStore::default();
        let peer_id = PeerId::random();

        store.add_addr(&peer_id, "/memory/123456".parse().unwrap(), Duration::from_secs(1));
        store.add_addr(&peer_id, "/memory/654321".parse().unwrap(), Duration::from_secs(1));
        assert_eq!(store.get_addrs(&peer_id).unwrap().len(), 2);

        // Adding a known address must not duplicate it.
        store.add_addr(&peer_id, "/memory/654321".parse().unwrap(), Duration::from_secs(1));
        assert_eq!(store.get_addrs(&peer_id).unwrap().len(), 2);

        store.remove_peer(&peer_id);
        assert!(store.get_addrs(&peer_id).is_none());
    }

    #[test]
    fn addr_records_expire() {
        let store = PeerStore::default();
        let peer_id = PeerId::random();

        store.add_addr(&peer_id, "/memory/1".parse().unwrap(), Duration::from_millis(10));
        store.add_addr(&peer_id, "/memory/2".parse().unwrap(), Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(20));

        let addrs = store.get_addrs(&peer_id).unwrap();
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].to_string(), "/memory/2");
    }

    #[test]
    fn key_and_proto_books() {
        let store = PeerStore::default();
        let key = Keypair::generate_ed25519().public();
        let peer_id = key.clone().into_peer_id();

        store.add_key(&peer_id, key.clone());
        assert_eq!(store.get_key(&peer_id), Some(key));

        store.add_protocols(&peer_id, vec!["/echo/1.0.0".into(), "/chat/1.0.0".into()]);
        assert_eq!(
            store.first_supported_protocol(&peer_id, vec!["/chat/1.0.0".into()]),
            Some("/chat/1.0.0".into())
        );
        assert_eq!(store.first_supported_protocol(&peer_id, vec!["/none/1.0.0".into()]), None);

        store.remove_peer(&peer_id);
        assert!(store.get_key(&peer_id).is_none());
        assert!(store.get_protocols(&peer_id).is_none());
    }
}
