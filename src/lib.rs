// Copyright 2020 Netwarps Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! up2p: a small peer-to-peer networking stack.
//!
//! Peers address each other by [`PeerId`], a hash of their public key;
//! connections run over the UDX reliable-datagram transport, are secured
//! and authenticated with a Noise XX handshake, and carry any number of
//! independent streams through a Yamux session. The [`Swarm`] composes the
//! three and hands out protocol-negotiated streams.
//!
//! A typical node:
//!
//! ```no_run
//! use up2p::core::identity::Keypair;
//! use up2p::core::transport::upgrade::TransportUpgrade;
//! use up2p::{NoiseConfig, Swarm, UdxTransport, YamuxConfig};
//!
//! # async fn node() {
//! let keypair = Keypair::generate_ed25519();
//! let transport = TransportUpgrade::new(
//!     UdxTransport::default(),
//!     NoiseConfig::new(keypair.clone()),
//!     YamuxConfig::new(),
//! );
//! let mut swarm = Swarm::new(keypair).with_transport(Box::new(transport));
//! swarm.listen_on(vec!["/ip4/127.0.0.1/udp/0/udx".parse().unwrap()]).await.unwrap();
//! let mut control = swarm.control();
//! swarm.start();
//! # let _ = control;
//! # }
//! ```

pub use up2p_core as core;
pub use up2p_multiaddr as multiaddr;
pub use up2p_noise as noise;
pub use up2p_swarm as swarm;
pub use up2p_traits as traits;
pub use up2p_udx as udx;
pub use up2p_yamux as yamux;

pub use up2p_core::{Multiaddr, PeerId, Protocol, PublicKey};
pub use up2p_noise::NoiseConfig;
pub use up2p_swarm::{Control, Substream, Swarm};
pub use up2p_udx::{UdxConfig, UdxTransport};
pub use up2p_yamux::Config as YamuxConfig;
