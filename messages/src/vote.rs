//! Representative votes.
//!
//! A vote asserts that one or more block hashes are the tip of their chains.
//! Votes are immutable once constructed and shared as `Arc<Vote>` between every
//! election that considers one of their hashes.
//!
//! Wire layout (big-endian where numeric):
//!
//! ```text
//! account[32] | signature[64] | timestamp[8] | payload type[1] | payload
//! ```
//!
//! The payload is either a count byte followed by `count` 32-byte hashes
//! (payload type `NotABlock`), or one embedded block of the declared type.
//! The low four bits of the timestamp are a duration code.

use orv_crypto::{blake2b_256_multi, sign_message, verify_signature};
use orv_types::{Account, Block, BlockHash, BlockType, KeyPair, Signature};
use std::sync::Arc;
use std::time::Duration;

use crate::MessageError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vote {
    pub voting_account: Account,
    pub signature: Signature,
    /// Packed timestamp: milliseconds in the high 60 bits, duration code in
    /// the low 4 bits. `u64::MAX` marks a final vote.
    timestamp: u64,
    hashes: Vec<BlockHash>,
    block: Option<Arc<Block>>,
}

impl Vote {
    /// Timestamp of a final vote.
    pub const TIMESTAMP_MAX: u64 = u64::MAX;
    pub const TIMESTAMP_MIN: u64 = 0x10;
    pub const TIMESTAMP_MASK: u64 = 0xffff_ffff_ffff_fff0;
    pub const DURATION_MAX: u8 = 0x0f;
    /// Hashes one vote message may carry.
    pub const MAX_HASHES: usize = 12;

    const HEADER_SIZE: usize = 32 + 64 + 8 + 1;

    /// Sign a vote for `hashes` with a timestamp in milliseconds and a
    /// duration code.
    pub fn new(key: &KeyPair, timestamp: u64, duration: u8, hashes: Vec<BlockHash>) -> Self {
        let timestamp = Self::packed_timestamp(timestamp, duration);
        let signature = sign_message(Self::signing_hash(timestamp, &hashes).as_bytes(), &key.private);
        Self {
            voting_account: key.public,
            signature,
            timestamp,
            hashes,
            block: None,
        }
    }

    /// Sign a final vote: the voter will never vote differently for these roots.
    pub fn new_final(key: &KeyPair, hashes: Vec<BlockHash>) -> Self {
        Self::new(key, Self::TIMESTAMP_MAX, Self::DURATION_MAX, hashes)
    }

    /// Sign a vote that carries the full block it votes for.
    pub fn new_with_block(key: &KeyPair, timestamp: u64, duration: u8, block: Arc<Block>) -> Self {
        let mut vote = Self::new(key, timestamp, duration, vec![block.hash()]);
        vote.block = Some(block);
        vote
    }

    /// Assemble a vote from already-signed parts. The signature is not checked.
    pub fn from_parts(
        voting_account: Account,
        signature: Signature,
        timestamp: u64,
        hashes: Vec<BlockHash>,
    ) -> Self {
        Self {
            voting_account,
            signature,
            timestamp,
            hashes,
            block: None,
        }
    }

    /// Combine a millisecond timestamp with a 4-bit duration code. The maximal
    /// timestamp is kept as is.
    pub fn packed_timestamp(timestamp: u64, duration: u8) -> u64 {
        debug_assert!(duration <= Self::DURATION_MAX);
        if timestamp == Self::TIMESTAMP_MAX {
            return Self::TIMESTAMP_MAX;
        }
        (timestamp & Self::TIMESTAMP_MASK) | (duration & Self::DURATION_MAX) as u64
    }

    /// The digest a representative signs: `blake2b(timestamp || hashes)`.
    pub fn signing_hash(timestamp: u64, hashes: &[BlockHash]) -> BlockHash {
        let timestamp_bytes = timestamp.to_be_bytes();
        let mut parts: Vec<&[u8]> = Vec::with_capacity(hashes.len() + 1);
        parts.push(&timestamp_bytes);
        parts.extend(hashes.iter().map(|h| h.as_bytes().as_slice()));
        BlockHash::new(blake2b_256_multi(&parts))
    }

    pub fn hash(&self) -> BlockHash {
        Self::signing_hash(self.timestamp, &self.hashes)
    }

    /// Digest over the signed content, the voter and the signature. Two votes
    /// with the same full hash are interchangeable.
    pub fn full_hash(&self) -> BlockHash {
        BlockHash::new(blake2b_256_multi(&[
            self.hash().as_bytes(),
            self.voting_account.as_bytes(),
            self.signature.as_bytes(),
        ]))
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn duration_bits(&self) -> u8 {
        (self.timestamp & !Self::TIMESTAMP_MASK) as u8
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(1u64 << (self.duration_bits() as u32 + 4))
    }

    pub fn is_final(&self) -> bool {
        self.timestamp == Self::TIMESTAMP_MAX
    }

    pub fn hashes(&self) -> &[BlockHash] {
        &self.hashes
    }

    pub fn block(&self) -> Option<&Arc<Block>> {
        self.block.as_ref()
    }

    /// Whether the signature verifies for the voting account.
    pub fn validate(&self) -> bool {
        verify_signature(self.hash().as_bytes(), &self.signature, &self.voting_account)
    }

    pub fn serialize(&self, out: &mut Vec<u8>) -> Result<(), MessageError> {
        out.extend_from_slice(self.voting_account.as_bytes());
        out.extend_from_slice(self.signature.as_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        match &self.block {
            Some(block) => {
                out.push(block.block_type() as u8);
                let bytes = block.to_bytes().map_err(|e| MessageError::Block(e.to_string()))?;
                out.extend_from_slice(&bytes);
            }
            None => {
                if self.hashes.len() > Self::MAX_HASHES {
                    return Err(MessageError::TooManyHashes {
                        count: self.hashes.len(),
                        max: Self::MAX_HASHES,
                    });
                }
                out.push(BlockType::NotABlock as u8);
                out.push(self.hashes.len() as u8);
                for hash in &self.hashes {
                    out.extend_from_slice(hash.as_bytes());
                }
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        let mut out = Vec::with_capacity(Self::HEADER_SIZE + 1 + self.hashes.len() * 32);
        self.serialize(&mut out)?;
        Ok(out)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, MessageError> {
        let header = take(bytes, 0, Self::HEADER_SIZE)?;
        let mut account = [0u8; 32];
        account.copy_from_slice(&header[..32]);
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&header[32..96]);
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&header[96..104]);
        let payload_type = header[104];

        let mut vote = Self {
            voting_account: Account::from_bytes(account),
            signature: Signature(signature),
            timestamp: u64::from_be_bytes(timestamp),
            hashes: Vec::new(),
            block: None,
        };

        let rest = &bytes[Self::HEADER_SIZE..];
        match BlockType::from_u8(payload_type) {
            Some(BlockType::NotABlock) => {
                let count = take(rest, 0, 1)?[0] as usize;
                if count == 0 {
                    return Err(MessageError::EmptyVote);
                }
                if count > Self::MAX_HASHES {
                    return Err(MessageError::TooManyHashes {
                        count,
                        max: Self::MAX_HASHES,
                    });
                }
                let raw = take(rest, 1, count * 32)?;
                vote.hashes = raw
                    .chunks_exact(32)
                    .map(|chunk| {
                        let mut hash = [0u8; 32];
                        hash.copy_from_slice(chunk);
                        BlockHash::new(hash)
                    })
                    .collect();
            }
            Some(declared) => {
                let (block, _) =
                    Block::from_bytes(rest).map_err(|e| MessageError::Block(e.to_string()))?;
                if block.block_type() != declared {
                    return Err(MessageError::BlockTypeMismatch {
                        declared: declared as u8,
                        decoded: block.block_type() as u8,
                    });
                }
                vote.hashes = vec![block.hash()];
                vote.block = Some(Arc::new(block));
            }
            None => return Err(MessageError::UnknownPayload(payload_type)),
        }
        Ok(vote)
    }
}

fn take(bytes: &[u8], offset: usize, len: usize) -> Result<&[u8], MessageError> {
    bytes
        .get(offset..offset + len)
        .ok_or(MessageError::Truncated {
            needed: offset + len,
            available: bytes.len(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use orv_crypto::keypair_from_seed;
    use orv_types::{Amount, PublicKey};

    fn make_hash(byte: u8) -> BlockHash {
        BlockHash::new([byte; 32])
    }

    fn key() -> KeyPair {
        keypair_from_seed(&[11u8; 32])
    }

    #[test]
    fn signed_vote_validates() {
        let vote = Vote::new(&key(), 1_000_000, 0x9, vec![make_hash(1), make_hash(2)]);
        assert!(vote.validate());
        assert_eq!(vote.duration_bits(), 0x9);
        assert_eq!(vote.duration(), Duration::from_millis(1 << 13));
        assert!(!vote.is_final());
    }

    #[test]
    fn corrupted_signature_fails() {
        let mut vote = Vote::new(&key(), 1_000_000, 0x9, vec![make_hash(1)]);
        vote.signature.0[10] ^= 0x80;
        assert!(!vote.validate());
    }

    #[test]
    fn signature_covers_timestamp() {
        let vote = Vote::new(&key(), 1_000_000, 0, vec![make_hash(1)]);
        let tampered = Vote::from_parts(vote.voting_account, vote.signature, 2_000_000, vec![make_hash(1)]);
        assert!(!tampered.validate());
    }

    #[test]
    fn final_vote_keeps_maximal_timestamp() {
        let vote = Vote::new_final(&key(), vec![make_hash(3)]);
        assert!(vote.is_final());
        assert_eq!(vote.timestamp(), u64::MAX);
        assert_eq!(vote.duration_bits(), Vote::DURATION_MAX);
        assert!(vote.validate());
    }

    #[test]
    fn packed_timestamp_masks_low_bits() {
        assert_eq!(Vote::packed_timestamp(0x1234_5678, 0x3), 0x1234_5673);
        assert_eq!(Vote::packed_timestamp(u64::MAX, 0), u64::MAX);
    }

    #[test]
    fn hashes_wire_layout() {
        let vote = Vote::new(&key(), 0x0102_0304_0506_0700, 0x1, vec![make_hash(4)]);
        let bytes = vote.to_bytes().unwrap();
        assert_eq!(bytes.len(), 32 + 64 + 8 + 1 + 1 + 32);
        assert_eq!(&bytes[96..104], &0x0102_0304_0506_0701u64.to_be_bytes());
        assert_eq!(bytes[104], BlockType::NotABlock as u8);
        assert_eq!(bytes[105], 1);

        let decoded = Vote::deserialize(&bytes).unwrap();
        assert_eq!(decoded, vote);
        assert!(decoded.validate());
    }

    #[test]
    fn embedded_block_decodes() {
        let block = Arc::new(Block::new_send(make_hash(1), PublicKey::from(2), Amount::raw(3)));
        let vote = Vote::new_with_block(&key(), 5_000, 0, block.clone());
        let decoded = Vote::deserialize(&vote.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.hashes(), &[block.hash()]);
        assert_eq!(decoded.block().map(|b| b.hash()), Some(block.hash()));
        assert!(decoded.validate());
    }

    #[test]
    fn too_many_hashes_rejected() {
        let hashes: Vec<_> = (0..13).map(make_hash).collect();
        let vote = Vote::new(&key(), 1, 0, hashes);
        assert_eq!(
            vote.to_bytes(),
            Err(MessageError::TooManyHashes { count: 13, max: 12 })
        );

        let mut bytes = Vote::new(&key(), 1, 0, vec![make_hash(1)]).to_bytes().unwrap();
        bytes[105] = 13;
        assert!(matches!(
            Vote::deserialize(&bytes),
            Err(MessageError::TooManyHashes { .. })
        ));
    }

    #[test]
    fn truncated_input_rejected() {
        let bytes = Vote::new(&key(), 1, 0, vec![make_hash(1), make_hash(2)]).to_bytes().unwrap();
        assert!(matches!(
            Vote::deserialize(&bytes[..bytes.len() - 1]),
            Err(MessageError::Truncated { .. })
        ));
        assert!(matches!(
            Vote::deserialize(&bytes[..50]),
            Err(MessageError::Truncated { .. })
        ));
    }

    #[test]
    fn unknown_payload_rejected() {
        let mut bytes = Vote::new(&key(), 1, 0, vec![make_hash(1)]).to_bytes().unwrap();
        bytes[104] = 0x7f;
        assert_eq!(Vote::deserialize(&bytes), Err(MessageError::UnknownPayload(0x7f)));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decoding_arbitrary_bytes_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..600)) {
                let _ = Vote::deserialize(&bytes);
            }

            #[test]
            fn hash_count_survives_wire(count in 1usize..=12, timestamp in any::<u64>()) {
                let hashes: Vec<_> = (0..count as u8).map(make_hash).collect();
                let vote = Vote::new(&key(), timestamp, 0, hashes);
                let decoded = Vote::deserialize(&vote.to_bytes().unwrap()).unwrap();
                prop_assert_eq!(decoded.hashes().len(), count);
                prop_assert_eq!(decoded.timestamp(), vote.timestamp());
            }
        }
    }
}
