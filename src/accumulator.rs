//! Accumulation of a known-length frame body from a chunked byte stream.
//!
//! Reads never ask for more than the frame still needs, so bytes belonging to
//! the next frame stay in the socket. Bytes that were already on hand beyond
//! the target (e.g. a header chunk that also carried the next frame) are
//! handed back as `surplus` for the next header decode.

use crate::error::TransferError;
use bytes::{Bytes, BytesMut};
use std::io::{self, Read};

/// Default upper bound for a single payload read.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Result of a completed accumulation.
#[derive(Debug)]
pub struct Filled {
    /// Exactly the requested number of bytes.
    pub body: Bytes,
    /// Bytes past the target that were already buffered.
    pub surplus: BytesMut,
}

/// Accumulate exactly `total` bytes, starting from `seed`.
///
/// Each read requests at most `chunk_size` bytes and never more than the
/// remaining count. A read of zero bytes before the target is reached is a
/// disconnect; a read timeout is reported as `TransferTimeout`.
///
/// `total` usually comes from an untrusted header, so the buffer grows with
/// the bytes actually received rather than being sized to `total` up front.
pub fn accumulate<R: Read + ?Sized>(
    source: &mut R,
    mut seed: BytesMut,
    total: usize,
    chunk_size: usize,
) -> Result<Filled, TransferError> {
    let chunk_size = chunk_size.max(1);

    if seed.len() < total {
        seed.reserve((total - seed.len()).min(chunk_size));
    }

    while seed.len() < total {
        let want = chunk_size.min(total - seed.len());
        let n = read_chunk(source, &mut seed, want)
            .map_err(|e| TransferError::from_read(e, seed.len(), total))?;
        if n == 0 {
            return Err(TransferError::ConnectionClosed {
                received: seed.len(),
                expected: total,
            });
        }
    }

    let body = seed.split_to(total).freeze();
    Ok(Filled {
        body,
        surplus: seed,
    })
}

/// Append up to `max` bytes from `source` to `buf`, retrying on `Interrupted`.
///
/// Returns the number of bytes read; 0 means the source reached EOF.
pub fn read_chunk<R: Read + ?Sized>(
    source: &mut R,
    buf: &mut BytesMut,
    max: usize,
) -> io::Result<usize> {
    let start = buf.len();
    buf.resize(start + max, 0);

    loop {
        match source.read(&mut buf[start..]) {
            Ok(n) => {
                buf.truncate(start + n);
                return Ok(n);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                buf.truncate(start);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Reader that hands out a fixed script of chunks, one per `read` call.
    ///
    /// A chunk larger than the caller's buffer is split and the rest is
    /// returned by the following read, like a socket receive queue.
    pub(crate) struct ChunkedReader {
        pub chunks: VecDeque<io::Result<Vec<u8>>>,
        pub requests: Vec<usize>,
    }

    impl ChunkedReader {
        pub fn new(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                chunks: chunks.into_iter().map(Ok).collect(),
                requests: Vec::new(),
            }
        }

        pub fn push_error(&mut self, kind: io::ErrorKind) {
            self.chunks.push_back(Err(io::Error::new(kind, "scripted")));
        }

        pub fn remaining(&self) -> Vec<u8> {
            self.chunks
                .iter()
                .filter_map(|c| c.as_ref().ok())
                .flatten()
                .copied()
                .collect()
        }
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.requests.push(buf.len());
            match self.chunks.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(mut chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.chunks.push_front(Ok(chunk.split_off(n)));
                    }
                    Ok(n)
                }
            }
        }
    }

    fn bytes(range: std::ops::Range<u8>) -> Vec<u8> {
        range.collect()
    }

    #[test]
    fn test_single_chunk() {
        let mut reader = ChunkedReader::new(vec![bytes(0..10)]);
        let filled = accumulate(&mut reader, BytesMut::new(), 10, 4096).unwrap();
        assert_eq!(&filled.body[..], &bytes(0..10)[..]);
        assert!(filled.surplus.is_empty());
    }

    #[test]
    fn test_one_byte_chunks() {
        let chunks = (0..50u8).map(|b| vec![b]).collect();
        let mut reader = ChunkedReader::new(chunks);
        let filled = accumulate(&mut reader, BytesMut::new(), 50, 4096).unwrap();
        assert_eq!(&filled.body[..], &bytes(0..50)[..]);
        assert_eq!(reader.requests.len(), 50);
    }

    #[test]
    fn test_irregular_chunks_with_seed() {
        let seed = BytesMut::from(&bytes(0..3)[..]);
        let mut reader = ChunkedReader::new(vec![bytes(3..4), bytes(4..20), bytes(20..23)]);
        let filled = accumulate(&mut reader, seed, 23, 4096).unwrap();
        assert_eq!(&filled.body[..], &bytes(0..23)[..]);
        assert!(filled.surplus.is_empty());
    }

    #[test]
    fn test_never_requests_past_target() {
        // Second frame's bytes sit right behind the first in the stream
        let mut reader = ChunkedReader::new(vec![bytes(0..100)]);
        let filled = accumulate(&mut reader, BytesMut::new(), 30, 4096).unwrap();
        assert_eq!(&filled.body[..], &bytes(0..30)[..]);
        assert!(filled.surplus.is_empty());
        assert_eq!(reader.requests, vec![30]);
        assert_eq!(reader.remaining(), bytes(30..100));
    }

    #[test]
    fn test_requests_bounded_by_chunk_size() {
        let mut reader = ChunkedReader::new(vec![bytes(0..100)]);
        let filled = accumulate(&mut reader, BytesMut::new(), 100, 16).unwrap();
        assert_eq!(filled.body.len(), 100);
        assert!(reader.requests.iter().all(|&r| r <= 16));
        assert_eq!(reader.requests.last(), Some(&4));
    }

    #[test]
    fn test_seed_larger_than_target_keeps_surplus() {
        let seed = BytesMut::from(&bytes(0..12)[..]);
        let mut reader = ChunkedReader::new(vec![]);
        let filled = accumulate(&mut reader, seed, 9, 4096).unwrap();
        assert_eq!(&filled.body[..], &bytes(0..9)[..]);
        assert_eq!(&filled.surplus[..], &bytes(9..12)[..]);
        assert!(reader.requests.is_empty());
    }

    #[test]
    fn test_zero_target() {
        let mut reader = ChunkedReader::new(vec![bytes(0..5)]);
        let filled = accumulate(&mut reader, BytesMut::new(), 0, 4096).unwrap();
        assert!(filled.body.is_empty());
        assert!(reader.requests.is_empty());
    }

    #[test]
    fn test_eof_mid_body() {
        let mut reader = ChunkedReader::new(vec![bytes(0..4)]);
        match accumulate(&mut reader, BytesMut::from(&b"xy"[..]), 10, 4096) {
            Err(TransferError::ConnectionClosed { received, expected }) => {
                assert_eq!(received, 6);
                assert_eq!(expected, 10);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_timeout_mid_body() {
        let mut reader = ChunkedReader::new(vec![bytes(0..2)]);
        reader.push_error(io::ErrorKind::WouldBlock);
        match accumulate(&mut reader, BytesMut::new(), 5, 4096) {
            Err(TransferError::TransferTimeout { received, expected }) => {
                assert_eq!(received, 2);
                assert_eq!(expected, 5);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_interrupted_is_retried() {
        let mut reader = ChunkedReader::new(vec![bytes(0..2)]);
        reader.push_error(io::ErrorKind::Interrupted);
        reader.chunks.push_back(Ok(bytes(2..5)));
        let filled = accumulate(&mut reader, BytesMut::new(), 5, 4096).unwrap();
        assert_eq!(&filled.body[..], &bytes(0..5)[..]);
    }

    #[test]
    fn test_huge_target_grows_with_received_bytes() {
        let mut reader = ChunkedReader::new(vec![bytes(0..3)]);
        match accumulate(&mut reader, BytesMut::new(), usize::MAX, 4096) {
            Err(TransferError::ConnectionClosed { received, expected }) => {
                assert_eq!(received, 3);
                assert_eq!(expected, usize::MAX);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_read_chunk_restores_length_on_error() {
        let mut reader = ChunkedReader::new(vec![]);
        reader.push_error(io::ErrorKind::ConnectionReset);
        let mut buf = BytesMut::from(&b"abc"[..]);
        assert!(read_chunk(&mut reader, &mut buf, 64).is_err());
        assert_eq!(&buf[..], b"abc");
    }
}
