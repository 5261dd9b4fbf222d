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

//! Transports, upgrades, multiplexing and identity of the up2p stack.
//!
//! The main concepts are:
//!
//! - A [`PeerId`] is a unique global identifier for a node on the network,
//!   the hash of the public key used to authenticate the communication
//!   channel, so that it cannot be spoofed.
//! - A [`transport::Transport`] establishes raw byte-streams by multiaddr;
//!   [`transport::upgrade::TransportUpgrade`] layers security and stream
//!   multiplexing on top.
//! - The capability traits in [`muxing`] and [`secure_io`] are what the
//!   swarm composes, with no knowledge of the concrete protocols behind
//!   them.

mod keys_proto;
mod peer_id;

pub mod identity;
pub mod multistream;
pub mod muxing;
pub mod peerstore;
pub mod secure_io;
pub mod transport;
pub mod upgrade;

pub use identity::{Keypair, PublicKey};
pub use peer_id::PeerId;
pub use transport::Transport;
pub use up2p_multiaddr::{Multiaddr, Multihash, Protocol};
