//! A two-process echo demo over the full stack: UDX, Noise XX, Yamux.
//!
//! Server: `cargo run --example swarm_echo server`
//! Client: `cargo run --example swarm_echo <server-multiaddr-with-peer-id>`

use async_std::task;
use async_trait::async_trait;
use log::info;
use std::time::Duration;
use up2p_core::identity::Keypair;
use up2p_core::transport::upgrade::TransportUpgrade;
use up2p_core::upgrade::UpgradeInfo;
use up2p_core::{Multiaddr, PeerId};
use up2p_noise::NoiseConfig;
use up2p_swarm::{IProtocolHandler, ProtocolHandler, ProtocolId, Substream, Swarm, SwarmError};
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
        info!("S: serving echo on {:?}", stream);
        let mut buf = [0; 4096];
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

fn make_swarm() -> Swarm {
    let keypair = Keypair::generate_ed25519();
    let transport = TransportUpgrade::new(
        UdxTransport::default(),
        NoiseConfig::new(keypair.clone()),
        up2p_yamux::Config::new(),
    );
    Swarm::new(keypair).with_transport(Box::new(transport))
}

fn main() {
    env_logger::builder().filter_level(log::LevelFilter::Info).init();
    if std::env::args().nth(1) == Some("server".to_string()) {
        info!("Starting server ......");
        run_server();
    } else {
        info!("Starting client ......");
        run_client();
    }
}

fn run_server() {
    task::block_on(async {
        let mut swarm = make_swarm().with_protocol_handler(Box::new(EchoHandler));
        let local_peer_id = swarm.local_peer_id().clone();
        swarm
            .listen_on(vec!["/ip4/127.0.0.1/udp/10333/udx".parse().unwrap()])
            .await
            .expect("listen");
        for addr in swarm.listen_addrs() {
            info!("S: listening on {}/p2p/{}", addr, local_peer_id);
        }
        swarm.start();
        // Serve forever.
        futures::future::pending::<()>().await;
    });
}

fn run_client() {
    let addr: Multiaddr = std::env::args()
        .nth(1)
        .expect("usage: swarm_echo <multiaddr-with-peer-id>")
        .parse()
        .expect("a valid multiaddr");
    let peer_id = addr
        .peer_id_part()
        .and_then(|mh| {
            use std::convert::TryFrom;
            PeerId::try_from(mh).ok()
        })
        .expect("the multiaddr must end in /p2p/<peer-id>");

    task::block_on(async move {
        let swarm = make_swarm();
        let mut ctrl = swarm.control();
        swarm.start();

        ctrl.add_addr(&peer_id, addr.without_peer_id(), Duration::from_secs(600));
        let mut stream = ctrl.new_stream(peer_id, vec![ECHO]).await.expect("new stream");

        let data = b"hello up2p";
        stream.write_all2(data).await.expect("write");
        info!("C: wrote {} bytes", data.len());

        let mut frame = vec![0; data.len()];
        stream.read_exact2(&mut frame).await.expect("read");
        info!("C: read {} bytes back", frame.len());
        assert_eq!(&data[..], &frame[..]);

        stream.close2().await.expect("close");
        ctrl.close().await;
    });
}
