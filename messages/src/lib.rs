//! Election messages for ORV node-to-node communication: votes, block
//! publishes and confirmation requests, plus the [`Network`] contract used to
//! send them.

pub mod error;
pub mod message;
pub mod network;
pub mod vote;

pub use error::MessageError;
pub use message::{ConfirmReq, Message, MessageType};
pub use network::{ChannelId, Network, PeerRepresentative};
pub use vote::Vote;
