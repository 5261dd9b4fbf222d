//! The UDX wire format.
//!
//! Every datagram starts with a fixed 28-byte header, fields big-endian:
//!
//! ```text
//! magic:u32 | flags:u16 | nsacks:u16 | src:u32 | dst:u32 | seq:u32 | ack:u32 | window:u32
//! ```
//!
//! followed by `nsacks` selective-ack ranges of `{start:u32, end:u32}`
//! (half-open, byte offsets) and the payload. `src` is the sender's stream
//! id, `dst` the receiver's; `dst` is zero in the first SYN, before the
//! peer's id is known. Sequence numbers count bytes; SYN and FIN each
//! occupy one sequence number. Datagram integrity is delegated to the UDP
//! checksum; a bad magic drops the packet.

use bytes::Bytes;

pub(crate) const MAGIC: u32 = 0x7564_7831; // "udx1"
pub(crate) const HEADER_LEN: usize = 28;
pub(crate) const MAX_SACK_RANGES: usize = 8;

pub(crate) const SYN: u16 = 1;
pub(crate) const ACK: u16 = 2;
pub(crate) const FIN: u16 = 4;
pub(crate) const RST: u16 = 8;
pub(crate) const DATA: u16 = 16;
pub(crate) const SACK: u16 = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Packet {
    pub flags: u16,
    /// The sender's stream id.
    pub src: u32,
    /// The receiver's stream id, zero if not yet known.
    pub dst: u32,
    pub seq: u32,
    pub ack: u32,
    /// The sender's advertised receive window, in bytes.
    pub window: u32,
    /// Half-open `[start, end)` ranges of bytes received out of order.
    pub sacks: Vec<(u32, u32)>,
    pub payload: Bytes,
}

impl Packet {
    pub(crate) fn has(&self, flag: u16) -> bool {
        self.flags & flag == flag
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        debug_assert!(self.sacks.len() <= MAX_SACK_RANGES);
        let mut buf = Vec::with_capacity(HEADER_LEN + self.sacks.len() * 8 + self.payload.len());
        buf.extend_from_slice(&MAGIC.to_be_bytes());
        buf.extend_from_slice(&self.flags.to_be_bytes());
        buf.extend_from_slice(&(self.sacks.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.src.to_be_bytes());
        buf.extend_from_slice(&self.dst.to_be_bytes());
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.extend_from_slice(&self.ack.to_be_bytes());
        buf.extend_from_slice(&self.window.to_be_bytes());
        for (start, end) in &self.sacks {
            buf.extend_from_slice(&start.to_be_bytes());
            buf.extend_from_slice(&end.to_be_bytes());
        }
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decodes a datagram. `None` means "not a UDX packet": wrong magic or
    /// truncated framing; such datagrams are dropped.
    pub(crate) fn decode(buf: &[u8]) -> Option<Packet> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let u32_at = |i: usize| u32::from_be_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        if u32_at(0) != MAGIC {
            return None;
        }
        let flags = u16::from_be_bytes([buf[4], buf[5]]);
        let nsacks = u16::from_be_bytes([buf[6], buf[7]]) as usize;
        if nsacks > MAX_SACK_RANGES || buf.len() < HEADER_LEN + nsacks * 8 {
            return None;
        }
        let mut sacks = Vec::with_capacity(nsacks);
        for i in 0..nsacks {
            let off = HEADER_LEN + i * 8;
            sacks.push((u32_at(off), u32_at(off + 4)));
        }
        Some(Packet {
            flags,
            src: u32_at(8),
            dst: u32_at(12),
            seq: u32_at(16),
            ack: u32_at(20),
            window: u32_at(24),
            sacks,
            payload: Bytes::copy_from_slice(&buf[HEADER_LEN + nsacks * 8..]),
        })
    }
}

/// `a < b` in the wrapping 32-bit sequence space.
pub(crate) fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// `a <= b` in the wrapping 32-bit sequence space.
pub(crate) fn seq_le(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) <= 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_identity() {
        let pkt = Packet {
            flags: SYN | ACK | DATA | SACK,
            src: 7,
            dst: 9,
            seq: 0xDEAD_BEEF,
            ack: 42,
            window: 1024 * 1024,
            sacks: vec![(100, 200), (400, 450)],
            payload: Bytes::from_static(b"some payload"),
        };
        let encoded = pkt.encode();
        let decoded = Packet::decode(&encoded).expect("decodes");
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn bad_magic_is_dropped() {
        let pkt = Packet {
            flags: ACK,
            src: 1,
            dst: 2,
            seq: 3,
            ack: 4,
            window: 5,
            sacks: vec![],
            payload: Bytes::new(),
        };
        let mut encoded = pkt.encode();
        encoded[0] ^= 0xFF;
        assert!(Packet::decode(&encoded).is_none());
    }

    #[test]
    fn truncated_packets_are_dropped() {
        assert!(Packet::decode(&[0u8; 10]).is_none());
        let pkt = Packet {
            flags: SACK,
            src: 1,
            dst: 2,
            seq: 3,
            ack: 4,
            window: 5,
            sacks: vec![(1, 2)],
            payload: Bytes::new(),
        };
        let encoded = pkt.encode();
        // Claiming a sack range the buffer does not carry.
        assert!(Packet::decode(&encoded[..HEADER_LEN]).is_none());
    }

    #[test]
    fn wrapping_sequence_compare() {
        assert!(seq_lt(u32::max_value() - 1, u32::max_value()));
        assert!(seq_lt(u32::max_value(), 0));
        assert!(seq_lt(0, 1));
        assert!(!seq_lt(1, 0));
        assert!(seq_le(5, 5));
    }
}
