use orv_types::{Block, BlockHash, Root};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::Vote;

/// Message kinds the election core sends and receives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Publish,
    ConfirmReq,
    ConfirmAck,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::ConfirmReq => "confirm_req",
            Self::ConfirmAck => "confirm_ack",
        }
    }
}

/// Request for votes on a set of `(hash, root)` pairs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmReq {
    pub roots_hashes: Vec<(BlockHash, Root)>,
}

impl ConfirmReq {
    pub fn new(roots_hashes: Vec<(BlockHash, Root)>) -> Self {
        Self { roots_hashes }
    }
}

/// An outbound election message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Flood a block so peers can start or join its election.
    Publish(Arc<Block>),
    ConfirmReq(ConfirmReq),
    /// A vote, relayed or freshly generated.
    ConfirmAck(Arc<Vote>),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Publish(_) => MessageType::Publish,
            Self::ConfirmReq(_) => MessageType::ConfirmReq,
            Self::ConfirmAck(_) => MessageType::ConfirmAck,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orv_types::{Account, Amount};

    #[test]
    fn message_type_matches_variant() {
        let block = Arc::new(Block::new_send(BlockHash::from(1), Account::from(2), Amount::raw(3)));
        assert_eq!(Message::Publish(block).message_type(), MessageType::Publish);
        let req = ConfirmReq::new(vec![(BlockHash::from(1), Root::from(BlockHash::from(0)))]);
        assert_eq!(Message::ConfirmReq(req).message_type().as_str(), "confirm_req");
    }
}
