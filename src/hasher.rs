//! SHAKE-128 integrity digests.
//!
//! The frame declares how many digest bytes it wants, so the hasher is an
//! extendable-output function read to exactly that length.

use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake128;

/// Digest `data` into exactly `length` bytes.
pub fn digest(data: &[u8], length: usize) -> Vec<u8> {
    digest_parts(&[data], length)
}

/// Digest the concatenation of `parts` into exactly `length` bytes.
pub fn digest_parts(parts: &[&[u8]], length: usize) -> Vec<u8> {
    let mut output = vec![0u8; length];
    if length == 0 {
        return output;
    }

    let mut hasher = Shake128::default();
    for &part in parts {
        hasher.update(part);
    }
    hasher.finalize_xof().read(&mut output);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_vector() {
        // SHAKE128("") first 16 bytes
        let expected = [
            0x7f, 0x9c, 0x2b, 0xa4, 0xe8, 0x8f, 0x82, 0x7d, 0x61, 0x60, 0x45, 0x50, 0x76, 0x05,
            0x85, 0x3e,
        ];
        assert_eq!(digest(b"", 16), expected);
    }

    #[test]
    fn test_length_is_exact() {
        for length in [0usize, 1, 4, 32, 255] {
            assert_eq!(digest(b"hello", length).len(), length);
        }
    }

    #[test]
    fn test_zero_length() {
        assert!(digest(b"anything", 0).is_empty());
    }

    #[test]
    fn test_deterministic() {
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        assert_eq!(digest(&data, 32), digest(&data, 32));
    }

    #[test]
    fn test_single_bit_flip_changes_digest() {
        let mut data = b"the quick brown fox".to_vec();
        let before = digest(&data, 16);
        data[7] ^= 0x01;
        assert_ne!(digest(&data, 16), before);
    }

    #[test]
    fn test_shorter_output_is_prefix() {
        let long = digest(b"hello", 32);
        let short = digest(b"hello", 8);
        assert_eq!(&long[..8], &short[..]);
    }

    #[test]
    fn test_parts_match_concatenation() {
        let joined = digest(b"headerpayload", 20);
        assert_eq!(digest_parts(&[&b"header"[..], &b"payload"[..]], 20), joined);
        assert_eq!(digest_parts(&[&b""[..], &b"headerpayload"[..], &b""[..]], 20), joined);
    }
}
