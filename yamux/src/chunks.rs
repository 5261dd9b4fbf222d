use bytes::{Buf, Bytes};
use std::collections::VecDeque;

/// A byte queue assembled from the bodies of received data frames.
///
/// Bytes are consumed from the front; a partially consumed front chunk is
/// advanced in place, so frame bodies never need to be copied on arrival.
#[derive(Debug, Default)]
pub(crate) struct Chunks {
    seq: VecDeque<Bytes>,
    len: usize,
}

impl Chunks {
    pub(crate) fn new() -> Self {
        Chunks::default()
    }

    /// The total number of unconsumed bytes.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a chunk of bytes to the back.
    pub(crate) fn push(&mut self, bytes: Bytes) {
        if !bytes.is_empty() {
            self.len += bytes.len();
            self.seq.push_back(bytes);
        }
    }

    /// Copies as many bytes as fit into `buf`, consuming them.
    pub(crate) fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < buf.len() {
            let front = match self.seq.front_mut() {
                Some(front) => front,
                None => break,
            };
            let n = std::cmp::min(front.len(), buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&front[..n]);
            front.advance(n);
            copied += n;
            self.len -= n;
            if front.is_empty() {
                self.seq.pop_front();
            }
        }
        copied
    }

    /// Drops all unconsumed bytes.
    pub(crate) fn clear(&mut self) {
        self.seq.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_across_chunks() {
        let mut chunks = Chunks::new();
        chunks.push(Bytes::from_static(&[1, 2, 3]));
        chunks.push(Bytes::new());
        chunks.push(Bytes::from_static(&[4, 5]));
        assert_eq!(chunks.len(), 5);

        let mut buf = [0u8; 4];
        assert_eq!(chunks.read_into(&mut buf), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(chunks.len(), 1);

        let mut buf = [0u8; 4];
        assert_eq!(chunks.read_into(&mut buf), 1);
        assert_eq!(buf[0], 5);
        assert!(chunks.is_empty());
        assert_eq!(chunks.read_into(&mut buf), 0);
    }
}
