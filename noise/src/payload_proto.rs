//! The libp2p Noise handshake payload, `payload.proto`.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NoiseExtensions {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub webtransport_certhashes: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
    #[prost(string, repeated, tag = "2")]
    pub stream_muxers: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NoiseHandshakePayload {
    /// The libp2p public-key envelope of the long-term identity key.
    #[prost(bytes = "vec", tag = "1")]
    pub identity_key: ::prost::alloc::vec::Vec<u8>,
    /// Signature by `identity_key` over
    /// `"noise-libp2p-static-key:" || static_public_key`.
    #[prost(bytes = "vec", tag = "2")]
    pub identity_sig: ::prost::alloc::vec::Vec<u8>,
    /// Informational copy of the Noise static public key.
    #[prost(bytes = "vec", tag = "3")]
    pub static_key: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, optional, tag = "4")]
    pub extensions: ::core::option::Option<NoiseExtensions>,
}
