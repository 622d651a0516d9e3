use thiserror::Error;

use crate::election::ElectionState;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("invalid election state transition from {from:?} to {to:?}")]
    InvalidTransition { from: ElectionState, to: ElectionState },

    #[error("election state changed concurrently: expected {expected:?}, found {found:?}")]
    StateMismatch {
        expected: ElectionState,
        found: ElectionState,
    },

    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(String),
}
