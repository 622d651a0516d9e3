//! Blake2b-256 digests used for vote signing hashes and uniquer keys.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;

pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    blake2b_256_multi(&[data])
}

/// Digest of `parts` fed in order, as if concatenated.
pub fn blake2b_256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let digest = parts
        .iter()
        .fold(Blake2b256::new(), |hasher, part| hasher.chain_update(part))
        .finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&digest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_hash_like_their_concatenation() {
        let timestamp = 7u64.to_be_bytes();
        let hash = [3u8; 32];
        let mut joined = timestamp.to_vec();
        joined.extend_from_slice(&hash);
        assert_eq!(blake2b_256_multi(&[&timestamp, &hash]), blake2b_256(&joined));
    }

    #[test]
    fn part_order_matters() {
        assert_ne!(
            blake2b_256_multi(&[b"root", b"hash"]),
            blake2b_256_multi(&[b"hash", b"root"])
        );
    }

    #[test]
    fn empty_input_has_a_digest() {
        assert_ne!(blake2b_256(b""), [0u8; 32]);
        assert_eq!(blake2b_256(b""), blake2b_256_multi(&[]));
    }
}
