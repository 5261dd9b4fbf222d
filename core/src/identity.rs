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

//! A node's network identity key.
//!
//! The identity key signs arbitrary byte strings and its public half, hashed,
//! is the node's [`PeerId`](crate::PeerId). Ed25519 is the only key type the
//! stack ships; the enums keep the door open for others.

use crate::keys_proto;
use crate::PeerId;
use prost::Message;
use thiserror::Error;

/// An error during decoding of key material.
#[derive(Error, Debug)]
#[error("key decoding failed: {msg}")]
pub struct DecodingError {
    msg: &'static str,
}

impl DecodingError {
    fn new(msg: &'static str) -> Self {
        DecodingError { msg }
    }
}

/// An error during signing with an identity key.
#[derive(Error, Debug)]
#[error("signing failed: {msg}")]
pub struct SigningError {
    msg: &'static str,
}

/// Ed25519 keys.
pub mod ed25519 {
    use super::{DecodingError, SigningError};
    use ed25519_dalek as ed25519;
    use rand::RngCore;
    use std::convert::TryFrom;
    use std::fmt;
    use zeroize::Zeroize;

    /// An Ed25519 keypair.
    pub struct Keypair(ed25519::Keypair);

    impl Keypair {
        /// Generate a new random Ed25519 keypair.
        pub fn generate() -> Keypair {
            Keypair::from(SecretKey::generate())
        }

        /// Encode the keypair into a byte array by concatenating the bytes
        /// of the secret scalar and the compressed public point.
        pub fn encode(&self) -> [u8; 64] {
            self.0.to_bytes()
        }

        /// Decode a keypair from the format produced by `encode`,
        /// zeroing the input on success.
        pub fn decode(kp: &mut [u8]) -> Result<Keypair, DecodingError> {
            ed25519::Keypair::from_bytes(kp)
                .map(|k| {
                    kp.zeroize();
                    Keypair(k)
                })
                .map_err(|_| DecodingError::new("invalid ed25519 keypair bytes"))
        }

        /// Sign a message using the private key of this keypair.
        pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
            use ed25519::Signer;
            self.0.sign(msg).to_bytes().to_vec()
        }

        /// Get the public key of this keypair.
        pub fn public(&self) -> PublicKey {
            PublicKey(self.0.public)
        }

        /// Get the secret key of this keypair.
        pub fn secret(&self) -> SecretKey {
            SecretKey::from_bytes(&mut self.0.secret.to_bytes()).expect("valid secret key bytes")
        }
    }

    impl fmt::Debug for Keypair {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Keypair").field("public", &self.0.public).finish()
        }
    }

    impl Clone for Keypair {
        fn clone(&self) -> Keypair {
            let mut sk_bytes = self.0.secret.to_bytes();
            let secret = SecretKey::from_bytes(&mut sk_bytes).expect("valid secret key bytes");
            Keypair::from(secret)
        }
    }

    /// Promote an Ed25519 secret key into a keypair.
    impl From<SecretKey> for Keypair {
        fn from(sk: SecretKey) -> Keypair {
            let secret: ed25519::ExpandedSecretKey = (&sk.0).into();
            let public = ed25519::PublicKey::from(&secret);
            Keypair(ed25519::Keypair { secret: sk.0, public })
        }
    }

    /// An Ed25519 public key.
    #[derive(PartialEq, Eq, Debug, Clone)]
    pub struct PublicKey(ed25519::PublicKey);

    impl PublicKey {
        /// Verify the Ed25519 signature on a message using the public key.
        pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
            use ed25519::Verifier;
            ed25519::Signature::try_from(sig).and_then(|s| self.0.verify(msg, &s)).is_ok()
        }

        /// Encode the public key into a byte array in compressed form.
        pub fn encode(&self) -> [u8; 32] {
            self.0.to_bytes()
        }

        /// Decode a public key from a byte array as produced by `encode`.
        pub fn decode(k: &[u8]) -> Result<PublicKey, DecodingError> {
            ed25519::PublicKey::from_bytes(k)
                .map_err(|_| DecodingError::new("invalid ed25519 public key bytes"))
                .map(PublicKey)
        }
    }

    /// An Ed25519 secret key.
    pub struct SecretKey(ed25519::SecretKey);

    /// View the bytes of the secret key.
    impl AsRef<[u8]> for SecretKey {
        fn as_ref(&self) -> &[u8] {
            self.0.as_bytes()
        }
    }

    impl Clone for SecretKey {
        fn clone(&self) -> SecretKey {
            let mut sk_bytes = self.0.to_bytes();
            Self::from_bytes(&mut sk_bytes).expect("valid secret key bytes")
        }
    }

    impl fmt::Debug for SecretKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("SecretKey")
        }
    }

    impl SecretKey {
        /// Generate a new Ed25519 secret key.
        pub fn generate() -> SecretKey {
            let mut bytes = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            SecretKey(ed25519::SecretKey::from_bytes(&bytes).expect("32 bytes are a valid secret key"))
        }

        /// Create an Ed25519 secret key from a byte slice, zeroing the input
        /// on success.
        pub fn from_bytes(mut sk_bytes: impl AsMut<[u8]>) -> Result<SecretKey, DecodingError> {
            let sk_bytes = sk_bytes.as_mut();
            let secret = ed25519::SecretKey::from_bytes(&*sk_bytes)
                .map_err(|_| DecodingError::new("invalid ed25519 secret key bytes"))?;
            sk_bytes.zeroize();
            Ok(SecretKey(secret))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn sign_verify() {
            let kp = Keypair::generate();
            let msg = b"an arbitrary byte string";
            let sig = kp.sign(msg);
            assert!(kp.public().verify(msg, &sig));
            assert!(!kp.public().verify(b"a different byte string", &sig));
        }

        #[test]
        fn keypair_encode_decode() {
            let kp = Keypair::generate();
            let pk = kp.public();
            let mut encoded = kp.encode();
            let decoded = Keypair::decode(&mut encoded).unwrap();
            assert_eq!(decoded.public(), pk);
        }
    }
}

/// The identity keypair of a node.
#[derive(Clone, Debug)]
pub enum Keypair {
    Ed25519(ed25519::Keypair),
}

impl Keypair {
    /// Generate a new Ed25519 keypair.
    pub fn generate_ed25519() -> Keypair {
        Keypair::Ed25519(ed25519::Keypair::generate())
    }

    /// Sign a message using the private key of this keypair, producing
    /// a signature that can be verified using the corresponding public key.
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, SigningError> {
        match self {
            Keypair::Ed25519(pair) => Ok(pair.sign(msg)),
        }
    }

    /// Get the public key of this keypair.
    pub fn public(&self) -> PublicKey {
        match self {
            Keypair::Ed25519(pair) => PublicKey::Ed25519(pair.public()),
        }
    }
}

/// The public key of a node's identity keypair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublicKey {
    Ed25519(ed25519::PublicKey),
}

impl PublicKey {
    /// Verify a signature for a message using this public key, i.e. check
    /// that the signature has been produced by the corresponding private key.
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        match self {
            PublicKey::Ed25519(pk) => pk.verify(msg, sig),
        }
    }

    /// Encode the public key into the libp2p protobuf envelope.
    pub fn into_protobuf_encoding(self) -> Vec<u8> {
        let public_key = match self {
            PublicKey::Ed25519(key) => keys_proto::PublicKey {
                r#type: keys_proto::KeyType::Ed25519 as i32,
                data: key.encode().to_vec(),
            },
        };
        let mut buf = Vec::with_capacity(public_key.encoded_len());
        public_key.encode(&mut buf).expect("Vec<u8> provides capacity as needed");
        buf
    }

    /// Decode a public key from the libp2p protobuf envelope.
    pub fn from_protobuf_encoding(bytes: &[u8]) -> Result<PublicKey, DecodingError> {
        let pubkey = keys_proto::PublicKey::decode(bytes)
            .map_err(|_| DecodingError::new("malformed public key envelope"))?;
        match keys_proto::KeyType::from_i32(pubkey.r#type) {
            Some(keys_proto::KeyType::Ed25519) => ed25519::PublicKey::decode(&pubkey.data).map(PublicKey::Ed25519),
            _ => Err(DecodingError::new("unsupported key type")),
        }
    }

    /// Derive the `PeerId` of this public key.
    pub fn into_peer_id(self) -> PeerId {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protobuf_envelope_round_trip() {
        let kp = Keypair::generate_ed25519();
        let pk = kp.public();
        let encoded = pk.clone().into_protobuf_encoding();
        let decoded = PublicKey::from_protobuf_encoding(&encoded).unwrap();
        assert_eq!(decoded, pk);
    }

    #[test]
    fn peer_id_is_stable() {
        let kp = Keypair::generate_ed25519();
        let a = kp.public().into_peer_id();
        let b = kp.public().into_peer_id();
        assert_eq!(a, b);
    }
}
