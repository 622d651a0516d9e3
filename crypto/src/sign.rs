//! Ed25519 message signing and verification.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use orv_types::{Account, Block, PrivateKey, PublicKey, Signature};
use rayon::prelude::*;

/// Sign a message with a private key, returning the signature.
pub fn sign_message(message: &[u8], private_key: &PrivateKey) -> Signature {
    let signing_key = SigningKey::from_bytes(&private_key.0);
    let sig = signing_key.sign(message);
    Signature(sig.to_bytes())
}

/// Verify a signature against a message and public key.
///
/// Returns `true` if the signature is valid, `false` otherwise.
pub fn verify_signature(message: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key.0) else {
        return false;
    };
    let dalek_sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    verifying_key.verify(message, &dalek_sig).is_ok()
}

/// One entry of a batched verification.
#[derive(Clone, Copy, Debug)]
pub struct VerifyItem<'a> {
    pub message: &'a [u8],
    pub signature: &'a Signature,
    pub public_key: &'a PublicKey,
}

/// Verify many signatures at once, spread across the rayon thread pool.
///
/// The result has one entry per item, in input order.
pub fn verify_batch(items: &[VerifyItem<'_>]) -> Vec<bool> {
    items
        .par_iter()
        .map(|item| verify_signature(item.message, item.signature, item.public_key))
        .collect()
}

/// Sign a block's hash in place.
pub fn sign_block(block: &mut Block, private_key: &PrivateKey) {
    let signature = sign_message(block.hash().as_bytes(), private_key);
    block.set_signature(signature);
}

/// Whether `block` carries a valid signature by `account` over its hash.
pub fn validate_block_signature(block: &Block, account: &Account) -> bool {
    verify_signature(block.hash().as_bytes(), block.signature(), account)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{generate_keypair, keypair_from_seed};
    use orv_types::{Amount, BlockHash};

    #[test]
    fn sign_and_verify() {
        let kp = generate_keypair();
        let msg = b"test message for orv";
        let sig = sign_message(msg, &kp.private);
        assert!(verify_signature(msg, &sig, &kp.public));
    }

    #[test]
    fn wrong_message_fails() {
        let kp = generate_keypair();
        let sig = sign_message(b"correct message", &kp.private);
        assert!(!verify_signature(b"wrong message", &sig, &kp.public));
    }

    #[test]
    fn wrong_key_fails() {
        let kp1 = generate_keypair();
        let kp2 = generate_keypair();
        let sig = sign_message(b"test", &kp1.private);
        assert!(!verify_signature(b"test", &sig, &kp2.public));
    }

    #[test]
    fn signature_deterministic() {
        let kp = keypair_from_seed(&[99u8; 32]);
        let sig1 = sign_message(b"deterministic test", &kp.private);
        let sig2 = sign_message(b"deterministic test", &kp.private);
        assert_eq!(sig1, sig2);
    }

    #[test]
    fn invalid_public_key() {
        let kp = generate_keypair();
        let sig = sign_message(b"test", &kp.private);
        assert!(!verify_signature(b"test", &sig, &PublicKey([0xFF; 32])));
    }

    #[test]
    fn batch_reports_each_item() {
        let kp = keypair_from_seed(&[7u8; 32]);
        let good = sign_message(b"one", &kp.private);
        let mut bad = sign_message(b"two", &kp.private);
        bad.0[0] ^= 0x01;

        let items = [
            VerifyItem { message: b"one", signature: &good, public_key: &kp.public },
            VerifyItem { message: b"two", signature: &bad, public_key: &kp.public },
            VerifyItem { message: b"one", signature: &good, public_key: &kp.public },
        ];
        assert_eq!(verify_batch(&items), vec![true, false, true]);
    }

    #[test]
    fn empty_batch() {
        assert!(verify_batch(&[]).is_empty());
    }

    #[test]
    fn block_signature_follows_hash() {
        let kp = keypair_from_seed(&[3u8; 32]);
        let mut block = Block::new_send(BlockHash::from(1), PublicKey::from(2), Amount::raw(5));
        sign_block(&mut block, &kp.private);
        assert!(validate_block_signature(&block, &kp.public));

        if let Block::Send(send) = &mut block {
            send.hashables_mut().balance = Amount::raw(4);
        }
        assert!(!validate_block_signature(&block, &kp.public));
    }
}
