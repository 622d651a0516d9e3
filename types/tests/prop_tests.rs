use proptest::prelude::*;

use orv_types::{Account, Amount, Block, BlockHash, Link, QualifiedRoot, Root};

fn arb_hash() -> impl Strategy<Value = BlockHash> {
    any::<[u8; 32]>().prop_map(BlockHash::new)
}

fn arb_account() -> impl Strategy<Value = Account> {
    any::<[u8; 32]>().prop_map(Account::from_bytes)
}

fn arb_state_block() -> impl Strategy<Value = Block> {
    (arb_account(), arb_hash(), arb_account(), any::<u128>(), any::<[u8; 32]>()).prop_map(
        |(account, previous, representative, balance, link)| {
            Block::new_state(
                account,
                previous,
                representative,
                Amount::raw(balance),
                Link::from(BlockHash::new(link)),
            )
        },
    )
}

proptest! {
    /// BlockHash::is_zero is true only for all-zero bytes.
    #[test]
    fn block_hash_is_zero_correct(bytes in prop::array::uniform32(0u8..)) {
        let hash = BlockHash::new(bytes);
        prop_assert_eq!(hash.is_zero(), bytes == [0u8; 32]);
    }

    /// Amount ordering matches the raw value ordering.
    #[test]
    fn amount_ordering_matches_raw(a in any::<u128>(), b in any::<u128>()) {
        prop_assert_eq!(Amount::raw(a).cmp(&Amount::raw(b)), a.cmp(&b));
    }

    /// Saturating arithmetic never wraps.
    #[test]
    fn amount_saturating_never_wraps(a in any::<u128>(), b in any::<u128>()) {
        prop_assert_eq!(Amount::raw(a).saturating_add(Amount::raw(b)).number(), a.saturating_add(b));
        prop_assert_eq!(Amount::raw(a).saturating_sub(Amount::raw(b)).number(), a.saturating_sub(b));
    }

    /// Scaling down never exceeds the original amount.
    #[test]
    fn amount_scaled_down_is_bounded(a in any::<u128>(), num in 0u128..1000, extra in 1u128..1000) {
        let denominator = num + extra;
        prop_assert!(Amount::raw(a).scaled(num, denominator) <= Amount::raw(a));
    }

    /// A state block's root is its previous hash, or the account when opening.
    #[test]
    fn state_block_root(block in arb_state_block()) {
        let previous = block.previous();
        let expected = if previous.is_zero() {
            Root::from(block.account_field().unwrap())
        } else {
            Root::from(previous)
        };
        prop_assert_eq!(block.root(), expected);
        prop_assert_eq!(block.qualified_root(), QualifiedRoot::new(expected, previous));
    }

    /// Decoding an encoded block yields the same block and hash.
    #[test]
    fn block_encoding_preserves_hash(block in arb_state_block()) {
        let bytes = block.to_bytes().unwrap();
        let (decoded, consumed) = Block::from_bytes(&bytes).unwrap();
        prop_assert_eq!(consumed, bytes.len());
        prop_assert_eq!(decoded.hash(), block.hash());
    }

    /// Arbitrary bytes never make the block decoder panic.
    #[test]
    fn block_decoder_survives_garbage(bytes in prop::collection::vec(any::<u8>(), 0..400)) {
        let _ = Block::from_bytes(&bytes);
    }

    /// Changing the balance changes the hash.
    #[test]
    fn balance_is_hashed(block in arb_state_block(), delta in 1u128..) {
        let Block::State(mut state) = block.clone() else { unreachable!() };
        let balance = state.hashables().balance.number();
        state.hashables_mut().balance = Amount::raw(balance.wrapping_add(delta));
        prop_assert_ne!(Block::State(state).hash(), block.hash());
    }
}
