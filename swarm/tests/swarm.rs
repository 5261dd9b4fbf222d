use async_std::task;
use async_trait::async_trait;
use std::time::Duration;
use up2p_core::identity::Keypair;
use up2p_core::transport::upgrade::TransportUpgrade;
use up2p_core::transport::TransportError;
use up2p_core::upgrade::UpgradeInfo;
use up2p_core::{Multiaddr, PeerId};
use up2p_noise::NoiseConfig;
use up2p_swarm::cleanup::CleanupConfig;
use up2p_swarm::eventbus::{Connectedness, Event};
use up2p_swarm::{
    ConnectionGater, Direction, IProtocolHandler, ProtocolHandler, ProtocolId, Substream, Swarm, SwarmError,
};
use up2p_traits::{ReadEx, WriteEx};
use up2p_udx::UdxTransport;

const ECHO: ProtocolId = b"/echo/1.0.0";

#[derive(Clone)]
struct EchoHandler;

impl UpgradeInfo for EchoHandler {
    type Info = ProtocolId;

    fn protocol_info(&self) -> Vec<Self::Info> {
        vec![ECHO]
    }
}

#[async_trait]
impl ProtocolHandler for EchoHandler {
    async fn handle(&mut self, mut stream: Substream, _info: ProtocolId) -> Result<(), SwarmError> {
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            let n = stream
                .read2(&mut buf)
                .await
                .map_err(|e| SwarmError::Transport(e.into()))?;
            if n == 0 {
                break;
            }
            stream
                .write_all2(&buf[..n])
                .await
                .map_err(|e| SwarmError::Transport(e.into()))?;
        }
        stream.close2().await.map_err(|e| SwarmError::Transport(e.into()))?;
        Ok(())
    }

    fn box_clone(&self) -> IProtocolHandler {
        Box::new(self.clone())
    }
}

/// Reads a bit, then tears the stream down with a reset.
#[derive(Clone)]
struct ResetHandler;

impl UpgradeInfo for ResetHandler {
    type Info = ProtocolId;

    fn protocol_info(&self) -> Vec<Self::Info> {
        vec![b"/reset/1.0.0"]
    }
}

#[async_trait]
impl ProtocolHandler for ResetHandler {
    async fn handle(&mut self, mut stream: Substream, _info: ProtocolId) -> Result<(), SwarmError> {
        let mut buf = vec![0u8; 1024];
        stream
            .read_exact2(&mut buf)
            .await
            .map_err(|e| SwarmError::Transport(e.into()))?;
        stream.reset().await.map_err(|e| SwarmError::Transport(e.into()))?;
        Ok(())
    }

    fn box_clone(&self) -> IProtocolHandler {
        Box::new(self.clone())
    }
}

fn make_swarm(handlers: Vec<IProtocolHandler>) -> (Swarm, PeerId) {
    let keypair = Keypair::generate_ed25519();
    let peer_id = keypair.public().into_peer_id();

    let mut mux = up2p_yamux::Config::new();
    // Big enough to absorb a full echo round without the caller having to
    // interleave reads and writes.
    mux.set_receive_window(2 * 1024 * 1024);
    mux.set_max_buffer_size(2 * 1024 * 1024);
    let transport = TransportUpgrade::new(UdxTransport::default(), NoiseConfig::new(keypair.clone()), mux);

    let mut swarm = Swarm::new(keypair).with_transport(Box::new(transport));
    for handler in handlers {
        swarm = swarm.with_protocol_handler(handler);
    }
    (swarm, peer_id)
}

async fn start_listening(swarm: &mut Swarm) -> Multiaddr {
    swarm
        .listen_on(vec!["/ip4/127.0.0.1/udp/0/udx".parse().unwrap()])
        .await
        .expect("listen");
    swarm.listen_addrs()[0].clone()
}

#[async_std::test]
async fn echo_round_trip_one_megabyte() {
    let (mut server, server_id) = make_swarm(vec![Box::new(EchoHandler)]);
    let server_addr = start_listening(&mut server).await;
    server.start();

    let (client, _) = make_swarm(vec![]);
    let mut ctrl = client.control();
    client.start();

    ctrl.add_addr(&server_id, server_addr, Duration::from_secs(600));
    let mut stream = ctrl.new_stream(server_id, vec![ECHO]).await.expect("new stream");

    let payload = vec![0xABu8; 1024 * 1024];
    stream.write_all2(&payload).await.unwrap();
    stream.close2().await.unwrap();

    let mut echoed = Vec::with_capacity(payload.len());
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = stream.read2(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        echoed.extend_from_slice(&buf[..n]);
    }
    assert_eq!(echoed.len(), 1024 * 1024);
    assert!(echoed.iter().all(|&b| b == 0xAB));
}

#[async_std::test]
async fn peer_id_mismatch_fails_the_dial() {
    let (mut server, server_id) = make_swarm(vec![Box::new(EchoHandler)]);
    let server_addr = start_listening(&mut server).await;
    let server_store = server.peer_store();
    server.start();

    let (client, _) = make_swarm(vec![]);
    let client_store = client.peer_store();
    let mut ctrl = client.control();
    client.start();

    // An expectation that cannot match the server's identity.
    let wrong_peer = PeerId::random();
    ctrl.add_addr(&wrong_peer, server_addr, Duration::from_secs(600));

    match ctrl.new_stream(wrong_peer.clone(), vec![ECHO]).await {
        Err(SwarmError::Transport(TransportError::PeerIdMismatch { got, .. })) => {
            assert_eq!(got, server_id);
        }
        other => panic!("expected a peer id mismatch, got {:?}", other.map(|_| ())),
    }

    // Neither side keeps any record of the other.
    task::sleep(Duration::from_millis(100)).await;
    assert!(client_store.get_key(&wrong_peer).is_none());
    assert!(client_store.get_key(&server_id).is_none());
    assert!(server_store.peers().is_empty());
}

#[async_std::test]
async fn stream_reset_leaves_the_connection_usable() {
    let (mut server, server_id) = make_swarm(vec![Box::new(ResetHandler), Box::new(EchoHandler)]);
    let server_addr = start_listening(&mut server).await;
    server.start();

    let (client, _) = make_swarm(vec![]);
    let mut ctrl = client.control();
    client.start();

    ctrl.add_addr(&server_id, server_addr, Duration::from_secs(600));
    let mut stream = ctrl
        .new_stream(server_id.clone(), vec![b"/reset/1.0.0"])
        .await
        .expect("new stream");

    stream.write_all2(&vec![1u8; 4096]).await.unwrap();

    // The handler reads 1 KiB and resets; our next read observes it.
    let err = loop {
        match stream.read2(&mut [0u8; 1024]).await {
            Ok(0) => panic!("expected a reset, got a clean close"),
            Ok(_) => continue,
            Err(e) => break e,
        }
    };
    assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);

    // The owning connection is still good for a new stream.
    let mut second = ctrl.new_stream(server_id, vec![ECHO]).await.expect("second stream");
    second.write_all2(b"still alive").await.unwrap();
    second.close2().await.unwrap();
    let mut buf = vec![0u8; 11];
    second.read_exact2(&mut buf).await.unwrap();
    assert_eq!(&buf, b"still alive");
}

#[async_std::test]
async fn no_addresses_error() {
    let (client, _) = make_swarm(vec![]);
    let mut ctrl = client.control();
    client.start();

    let stranger = PeerId::random();
    match ctrl.new_stream(stranger, vec![ECHO]).await {
        Err(SwarmError::NoAddresses(_)) => {}
        other => panic!("expected NoAddresses, got {:?}", other.map(|_| ())),
    }
}

struct RejectAll;

impl ConnectionGater for RejectAll {
    fn intercept_secured(&self, _peer: &PeerId, _dir: Direction, _remote_addr: &Multiaddr) -> bool {
        false
    }
}

#[async_std::test]
async fn gated_connections_are_closed() {
    let (server, server_id) = make_swarm(vec![Box::new(EchoHandler)]);
    let mut server = server.with_connection_gater(Box::new(RejectAll));
    let server_addr = start_listening(&mut server).await;
    let server_store = server.peer_store();
    server.start();

    let (client, _) = make_swarm(vec![]);
    let mut ctrl = client.control();
    client.start();

    ctrl.add_addr(&server_id, server_addr, Duration::from_secs(600));
    // The server drops the connection post-handshake; whatever stage the
    // client reaches, the stream cannot come up.
    let res = ctrl
        .new_stream_with_timeout(server_id, vec![ECHO], Duration::from_secs(3))
        .await;
    assert!(res.is_err());
    task::sleep(Duration::from_millis(100)).await;
    assert!(server_store.peers().is_empty());
}

#[async_std::test]
async fn grace_period_evicts_exactly_once() {
    let (mut server, server_id) = make_swarm(vec![Box::new(EchoHandler)]);
    let server_addr = start_listening(&mut server).await;
    server.start();

    let (client, _) = make_swarm(vec![]);
    let client = client.with_cleanup_config(CleanupConfig {
        grace: Duration::from_millis(600),
        interval: Duration::from_millis(300),
    });
    let bus = client.event_bus();
    let store = client.peer_store();
    let mut ctrl = client.control();
    client.start();

    let mut events = bus.subscribe();

    ctrl.add_addr(&server_id, server_addr, Duration::from_secs(600));
    ctrl.new_connection(server_id.clone()).await.expect("first connect");
    ctrl.disconnect(server_id.clone()).await.expect("disconnect");

    // Reconnect within the grace period cancels the eviction.
    task::sleep(Duration::from_millis(150)).await;
    ctrl.new_connection(server_id.clone()).await.expect("reconnect");
    ctrl.disconnect(server_id.clone()).await.expect("second disconnect");

    // Stay disconnected past the grace period.
    task::sleep(Duration::from_millis(1500)).await;
    assert!(
        store.get_addrs(&server_id).is_none(),
        "peer must be evicted after the grace period"
    );

    // Events arrived in causal order: connected, not-connected, twice.
    let mut seen = Vec::new();
    while let Ok(Some(ev)) = events.try_next() {
        if let Event::PeerConnectednessChanged { connectedness, .. } = ev {
            seen.push(connectedness);
        }
    }
    assert_eq!(
        seen,
        vec![
            Connectedness::Connected,
            Connectedness::NotConnected,
            Connectedness::Connected,
            Connectedness::NotConnected,
        ]
    );
}

#[async_std::test]
async fn graceful_close_gives_clean_eof() {
    let (mut server, server_id) = make_swarm(vec![Box::new(EchoHandler)]);
    let server_addr = start_listening(&mut server).await;
    server.start();

    let (client, _) = make_swarm(vec![]);
    let mut ctrl = client.control();
    client.start();

    ctrl.add_addr(&server_id, server_addr, Duration::from_secs(600));
    let mut s1 = ctrl.new_stream(server_id.clone(), vec![ECHO]).await.expect("s1");
    let mut s2 = ctrl.new_stream(server_id.clone(), vec![ECHO]).await.expect("s2");

    ctrl.disconnect(server_id).await.expect("disconnect");

    // Both streams observe a clean end-of-stream, not a reset.
    assert_eq!(s1.read2(&mut [0u8; 16]).await.unwrap(), 0);
    assert_eq!(s2.read2(&mut [0u8; 16]).await.unwrap(), 0);
}
