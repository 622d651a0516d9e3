//! Property tests for the vote wire format.
//!
//! Votes arrive from untrusted peers, so the decoder must reject anything
//! malformed without panicking, and a decoded vote must verify exactly when
//! the original did.

use proptest::prelude::*;

use orv_crypto::keypair_from_seed;
use orv_messages::Vote;
use orv_types::BlockHash;

fn arb_hashes() -> impl Strategy<Value = Vec<BlockHash>> {
    prop::collection::vec(any::<[u8; 32]>().prop_map(BlockHash::new), 1..=Vote::MAX_HASHES)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Arbitrary bytes never make the decoder panic.
    #[test]
    fn decoder_survives_garbage(bytes in prop::collection::vec(any::<u8>(), 0..600)) {
        let _ = Vote::deserialize(&bytes);
    }

    /// Every strict prefix of a valid encoding is rejected.
    #[test]
    fn truncated_votes_are_rejected(seed in any::<[u8; 32]>(), hashes in arb_hashes(), cut in any::<prop::sample::Index>()) {
        let vote = Vote::new(&keypair_from_seed(&seed), 0x100, 1, hashes);
        let bytes = vote.to_bytes().unwrap();
        let len = cut.index(bytes.len());
        prop_assert!(Vote::deserialize(&bytes[..len]).is_err());
    }

    /// A decoded vote keeps its signature valid and its identity.
    #[test]
    fn decoded_vote_still_verifies(seed in any::<[u8; 32]>(), timestamp in any::<u64>(), hashes in arb_hashes()) {
        let vote = Vote::new(&keypair_from_seed(&seed), timestamp, 0, hashes);
        let decoded = Vote::deserialize(&vote.to_bytes().unwrap()).unwrap();
        prop_assert!(decoded.validate());
        prop_assert_eq!(decoded.hash(), vote.hash());
        prop_assert_eq!(decoded.full_hash(), vote.full_hash());
    }

    /// Flipping any signature bit invalidates the vote.
    #[test]
    fn any_signature_bit_flip_invalidates(seed in any::<[u8; 32]>(), hashes in arb_hashes(), bit in 0usize..512) {
        let vote = Vote::new(&keypair_from_seed(&seed), 0x100, 0, hashes);
        let mut signature = vote.signature;
        signature.0[bit / 8] ^= 1 << (bit % 8);
        let forged = Vote::from_parts(vote.voting_account, signature, vote.timestamp(), vote.hashes().to_vec());
        prop_assert!(!forged.validate());
    }
}
