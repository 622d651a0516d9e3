//! The node's local representative keys.
//!
//! The election core asks the wallets whether this node votes at all, which
//! accounts it votes with, and to sign vote digests with them.

use orv_crypto::sign_message;
use orv_ledger::Ledger;
use orv_types::{Account, BlockHash, KeyPair, Signature};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::online_reps::OnlineReps;

pub trait Wallets: Send + Sync {
    /// Local accounts that currently carry voting weight.
    fn voting_reps(&self) -> Vec<Account>;

    /// Whether some local representative holds at least half the principal
    /// representative weight.
    fn have_half_rep(&self) -> bool;

    /// Whether `account` is held locally.
    fn exists(&self, account: &Account) -> bool;

    /// All locally held accounts.
    fn accounts(&self) -> Vec<Account>;

    /// Sign `digest` with `account`'s key.
    fn sign(&self, account: &Account, digest: &BlockHash) -> Option<Signature>;
}

/// In-memory wallet holding plain key pairs.
pub struct KeyWallets {
    ledger: Arc<Ledger>,
    online_reps: Arc<OnlineReps>,
    keys: Mutex<HashMap<Account, KeyPair>>,
}

impl KeyWallets {
    pub fn new(ledger: Arc<Ledger>, online_reps: Arc<OnlineReps>) -> Self {
        Self {
            ledger,
            online_reps,
            keys: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, key: KeyPair) {
        self.keys.lock().unwrap().insert(key.account(), key);
    }

    pub fn remove(&self, account: &Account) {
        self.keys.lock().unwrap().remove(account);
    }
}

impl Wallets for KeyWallets {
    fn voting_reps(&self) -> Vec<Account> {
        let keys = self.keys.lock().unwrap();
        let mut reps: Vec<Account> = keys
            .keys()
            .filter(|account| !self.ledger.weight(account).is_zero())
            .copied()
            .collect();
        reps.sort();
        reps
    }

    fn have_half_rep(&self) -> bool {
        let half_principal = self.online_reps.minimum_principal_weight().scaled(1, 2);
        self.voting_reps()
            .iter()
            .any(|rep| self.ledger.weight(rep) >= half_principal)
    }

    fn exists(&self, account: &Account) -> bool {
        self.keys.lock().unwrap().contains_key(account)
    }

    fn accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self.keys.lock().unwrap().keys().copied().collect();
        accounts.sort();
        accounts
    }

    fn sign(&self, account: &Account, digest: &BlockHash) -> Option<Signature> {
        let keys = self.keys.lock().unwrap();
        keys.get(account)
            .map(|key| sign_message(digest.as_bytes(), &key.private))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orv_crypto::{keypair_from_seed, verify_signature};
    use orv_ledger::{dev_genesis_key, LedgerConstants};
    use orv_nullables::SteadyClock;
    use orv_types::NetworkParams;

    fn setup() -> KeyWallets {
        let ledger = Arc::new(Ledger::new(LedgerConstants::dev()));
        let online_reps = Arc::new(OnlineReps::new(
            Arc::clone(&ledger),
            NetworkParams::dev(),
            SteadyClock::new_null(),
        ));
        KeyWallets::new(ledger, online_reps)
    }

    #[test]
    fn empty_wallet_does_not_vote() {
        let wallets = setup();
        assert!(wallets.voting_reps().is_empty());
        assert!(!wallets.have_half_rep());
    }

    #[test]
    fn weighted_key_votes() {
        let wallets = setup();
        wallets.insert(dev_genesis_key());
        wallets.insert(keypair_from_seed(&[3; 32]));
        assert_eq!(wallets.voting_reps(), vec![dev_genesis_key().account()]);
        assert!(wallets.have_half_rep());
        assert_eq!(wallets.accounts().len(), 2);
    }

    #[test]
    fn sign_uses_stored_key() {
        let wallets = setup();
        let key = keypair_from_seed(&[3; 32]);
        let account = key.account();
        wallets.insert(key);
        let digest = BlockHash::from(42);
        let signature = wallets.sign(&account, &digest).unwrap();
        assert!(verify_signature(digest.as_bytes(), &signature, &account));
        assert!(wallets.sign(&Account::from(1), &digest).is_none());
    }

    #[test]
    fn remove_forgets_key() {
        let wallets = setup();
        wallets.insert(dev_genesis_key());
        wallets.remove(&dev_genesis_key().account());
        assert!(!wallets.exists(&dev_genesis_key().account()));
    }
}
