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

//! The XX handshake procedure.
//!
//! Three messages, initiator first:
//!
//! ```text
//! -> e
//! <- e, ee, s, es, <payload>
//! -> s, se, <payload>
//! ```
//!
//! The payload binds the ephemeral Noise static key to the node's long-term
//! identity key: it carries the identity public key and a signature over
//! `"noise-libp2p-static-key:" || static_public_key`. Verification failure
//! aborts the handshake before any key material is exposed.

use crate::error::NoiseError;
use crate::io::NoiseOutput;
use crate::payload_proto::NoiseHandshakePayload;
use crate::NoiseConfig;
use lazy_static::lazy_static;
use log::{debug, trace};
use prost::Message;
use snow::{params::NoiseParams, HandshakeState};
use std::sync::Arc;
use up2p_core::transport::ConnectionInfo;
use up2p_core::PublicKey;
use up2p_traits::{ReadEx, SplitEx, SplittableReadWrite, WriteEx};

/// Prefix of the signed binding between identity key and Noise static key.
const STATIC_KEY_DOMAIN: &str = "noise-libp2p-static-key:";

/// Max. size of a handshake message, like any other record.
const MAX_HANDSHAKE_MSG_LEN: usize = 65535;

lazy_static! {
    static ref PARAMS: NoiseParams = "Noise_XX_25519_ChaChaPoly_SHA256"
        .parse()
        .expect("valid noise parameter string");
}

/// Performs the XX handshake on the given socket.
///
/// On success returns the secured stream, bound to the verified remote
/// identity.
pub(crate) async fn handshake<T>(socket: T, config: NoiseConfig, initiator: bool) -> Result<NoiseOutput<T>, NoiseError>
where
    T: ConnectionInfo + SplittableReadWrite,
{
    let la = socket.local_multiaddr();
    let ra = socket.remote_multiaddr();

    let builder = snow::Builder::new(PARAMS.clone());
    // A fresh Noise static key per connection; the payload signature ties
    // it to the long-term identity.
    let static_keypair = builder.generate_keypair()?;
    let builder = builder.local_private_key(&static_keypair.private);
    let mut session = if initiator {
        builder.build_initiator()?
    } else {
        builder.build_responder()?
    };

    let local_payload = make_payload(&config, &static_keypair.public)?;
    let (mut reader, mut writer) = socket.split();
    let mut buf = vec![0u8; MAX_HANDSHAKE_MSG_LEN];

    let remote_identity;
    if initiator {
        // -> e
        trace!("handshake: sending e");
        let n = session.write_message(&[], &mut buf)?;
        send_frame(&mut writer, &buf[..n]).await?;

        // <- e, ee, s, es, <payload>
        let msg = recv_frame(&mut reader).await?;
        let mut payload = vec![0u8; msg.len()];
        let n = session.read_message(&msg, &mut payload)?;
        trace!("handshake: received e, ee, s, es");
        remote_identity = verify_payload(&session, &payload[..n])?;

        // -> s, se, <payload>
        let n = session.write_message(&local_payload, &mut buf)?;
        send_frame(&mut writer, &buf[..n]).await?;
        trace!("handshake: sent s, se");
    } else {
        // -> e
        let msg = recv_frame(&mut reader).await?;
        let mut payload = vec![0u8; msg.len().max(1)];
        session.read_message(&msg, &mut payload)?;
        trace!("handshake: received e");

        // <- e, ee, s, es, <payload>
        let n = session.write_message(&local_payload, &mut buf)?;
        send_frame(&mut writer, &buf[..n]).await?;
        trace!("handshake: sent e, ee, s, es");

        // -> s, se, <payload>
        let msg = recv_frame(&mut reader).await?;
        let mut payload = vec![0u8; msg.len()];
        let n = session.read_message(&msg, &mut payload)?;
        trace!("handshake: received s, se");
        remote_identity = verify_payload(&session, &payload[..n])?;
    }

    let cipher = session.into_stateless_transport_mode()?;
    debug!("noise handshake complete, remote peer {}", remote_identity.clone().into_peer_id());

    Ok(NoiseOutput::new(
        reader,
        writer,
        Arc::new(cipher),
        la,
        ra,
        config.keypair().clone(),
        remote_identity,
    ))
}

/// Builds the local identity payload.
fn make_payload(config: &NoiseConfig, static_public: &[u8]) -> Result<Vec<u8>, NoiseError> {
    let mut to_sign = STATIC_KEY_DOMAIN.as_bytes().to_vec();
    to_sign.extend_from_slice(static_public);
    let identity_sig = config.keypair().sign(&to_sign).map_err(|_| NoiseError::SigningFailed)?;

    let payload = NoiseHandshakePayload {
        identity_key: config.keypair().public().into_protobuf_encoding(),
        identity_sig,
        static_key: static_public.to_vec(),
        extensions: None,
    };
    let mut buf = Vec::with_capacity(payload.encoded_len());
    payload.encode(&mut buf).expect("Vec<u8> provides capacity as needed");
    Ok(buf)
}

/// Decodes and verifies the remote identity payload against the Noise
/// static key observed in the handshake.
fn verify_payload(session: &HandshakeState, payload: &[u8]) -> Result<PublicKey, NoiseError> {
    let payload = NoiseHandshakePayload::decode(payload)?;
    let identity = PublicKey::from_protobuf_encoding(&payload.identity_key).map_err(|_| NoiseError::InvalidKey)?;
    let remote_static = session.get_remote_static().ok_or(NoiseError::InvalidKey)?;

    let mut msg = STATIC_KEY_DOMAIN.as_bytes().to_vec();
    msg.extend_from_slice(remote_static);
    if !identity.verify(&msg, &payload.identity_sig) {
        debug!("failed to verify the remote's identity signature");
        return Err(NoiseError::BadSignature);
    }
    Ok(identity)
}

async fn send_frame<W: WriteEx>(writer: &mut W, frame: &[u8]) -> Result<(), NoiseError> {
    debug_assert!(frame.len() <= MAX_HANDSHAKE_MSG_LEN);
    let mut msg = Vec::with_capacity(2 + frame.len());
    msg.extend_from_slice(&(frame.len() as u16).to_be_bytes());
    msg.extend_from_slice(frame);
    writer.write_all2(&msg).await?;
    writer.flush2().await?;
    Ok(())
}

async fn recv_frame<R: ReadEx>(reader: &mut R) -> Result<Vec<u8>, NoiseError> {
    let mut len_buf = [0u8; 2];
    reader.read_exact2(&mut len_buf).await?;
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut frame = vec![0u8; len];
    reader.read_exact2(&mut frame).await?;
    Ok(frame)
}
