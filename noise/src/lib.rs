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

//! Noise XX channel security.
//!
//! Runs the `Noise_XX_25519_ChaChaPoly_SHA256` handshake, verifying the
//! remote's long-term identity through the signed handshake payload, and
//! produces a [`NoiseOutput`]: an authenticated-encryption byte-stream the
//! muxer upgrade runs on top of.

mod error;
mod handshake;
mod io;
mod payload_proto;

pub use error::NoiseError;
pub use io::{NoiseOutput, NoiseReadHalf, NoiseWriteHalf, MAX_FRAME_LEN, MAX_PLAINTEXT_LEN};
pub use payload_proto::{NoiseExtensions, NoiseHandshakePayload};

use async_trait::async_trait;
use up2p_core::identity::Keypair;
use up2p_core::transport::{ConnectionInfo, TransportError};
use up2p_core::upgrade::{UpgradeInfo, Upgrader};
use up2p_traits::SplittableReadWrite;

/// Configuration of the Noise security upgrade: the local identity.
#[derive(Clone)]
pub struct NoiseConfig {
    keypair: Keypair,
}

impl NoiseConfig {
    pub fn new(keypair: Keypair) -> Self {
        NoiseConfig { keypair }
    }

    pub(crate) fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// Runs the handshake directly, outside of the upgrade machinery.
    pub async fn handshake<T>(self, socket: T, initiator: bool) -> Result<NoiseOutput<T>, NoiseError>
    where
        T: ConnectionInfo + SplittableReadWrite,
    {
        handshake::handshake(socket, self, initiator).await
    }
}

impl UpgradeInfo for NoiseConfig {
    type Info = &'static [u8];

    fn protocol_info(&self) -> Vec<Self::Info> {
        vec![b"/noise"]
    }
}

#[async_trait]
impl<T> Upgrader<T> for NoiseConfig
where
    T: ConnectionInfo + SplittableReadWrite,
{
    type Output = NoiseOutput<T>;

    async fn upgrade_inbound(self, socket: T, _info: Self::Info) -> Result<Self::Output, TransportError> {
        handshake::handshake(socket, self, false)
            .await
            .map_err(|e| TransportError::SecurityError(Box::new(e)))
    }

    async fn upgrade_outbound(self, socket: T, _info: Self::Info) -> Result<Self::Output, TransportError> {
        handshake::handshake(socket, self, true)
            .await
            .map_err(|e| TransportError::SecurityError(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::task;
    use prost::Message;
    use up2p_core::secure_io::SecureInfo;
    use up2p_core::transport::memory::Chan;
    use up2p_traits::{ReadEx, WriteEx};

    #[test]
    fn payload_encode_decode_identity() {
        let payload = NoiseHandshakePayload {
            identity_key: vec![1, 2, 3],
            identity_sig: vec![4; 64],
            static_key: vec![7; 32],
            extensions: Some(NoiseExtensions {
                webtransport_certhashes: vec![vec![9, 9]],
                stream_muxers: vec!["/yamux/1.0.0".to_string()],
            }),
        };
        let mut buf = Vec::new();
        payload.encode(&mut buf).unwrap();
        let decoded = NoiseHandshakePayload::decode(&buf[..]).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn handshake_and_transfer() {
        let server_key = Keypair::generate_ed25519();
        let client_key = Keypair::generate_ed25519();
        let server_id = server_key.public().into_peer_id();
        let client_id = client_key.public().into_peer_id();

        let (a, b) = Chan::pair();

        let server = task::spawn(async move {
            let config = NoiseConfig::new(server_key);
            let mut out = config.handshake(b, false).await.expect("server handshake");
            assert_eq!(out.remote_peer(), client_id);

            let mut buf = [0u8; 11];
            out.read_exact2(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hello noise");
            out.write_all2(b"hello back").await.unwrap();
        });

        task::block_on(async move {
            let config = NoiseConfig::new(client_key);
            let mut out = config.handshake(a, true).await.expect("client handshake");
            assert_eq!(out.remote_peer(), server_id);

            out.write_all2(b"hello noise").await.unwrap();
            let mut buf = [0u8; 10];
            out.read_exact2(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hello back");
            server.await;
        });
    }

    #[test]
    fn large_transfer_spans_records() {
        let server_key = Keypair::generate_ed25519();
        let client_key = Keypair::generate_ed25519();

        let (a, b) = Chan::pair();
        let data = vec![0xCDu8; 2 * MAX_PLAINTEXT_LEN + 123];
        let expected = data.clone();

        let server = task::spawn(async move {
            let config = NoiseConfig::new(server_key);
            let mut out = config.handshake(b, false).await.unwrap();
            let mut received = vec![0u8; expected.len()];
            out.read_exact2(&mut received).await.unwrap();
            assert_eq!(received, expected);
        });

        task::block_on(async move {
            let config = NoiseConfig::new(client_key);
            let mut out = config.handshake(a, true).await.unwrap();
            out.write_all2(&data).await.unwrap();
            out.flush2().await.unwrap();
            server.await;
        });
    }

    #[test]
    fn split_halves_work_independently() {
        use up2p_traits::SplitEx;

        let server_key = Keypair::generate_ed25519();
        let client_key = Keypair::generate_ed25519();
        let (a, b) = Chan::pair();

        let server = task::spawn(async move {
            let out = NoiseConfig::new(server_key).handshake(b, false).await.unwrap();
            let (mut r, mut w) = out.split();
            let mut buf = [0u8; 4];
            r.read_exact2(&mut buf).await.unwrap();
            w.write_all2(&buf).await.unwrap();
        });

        task::block_on(async move {
            let out = NoiseConfig::new(client_key).handshake(a, true).await.unwrap();
            let (mut r, mut w) = out.split();
            w.write_all2(b"ping").await.unwrap();
            let mut buf = [0u8; 4];
            r.read_exact2(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping");
            server.await;
        });
    }
}
