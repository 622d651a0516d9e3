//! The outbound transport contract the election core talks to.
//!
//! Peer discovery, channels and framing live behind [`Network`]; the core only
//! asks who the representatives are and hands messages over.

use orv_types::{Account, Block};
use std::fmt;

use crate::Message;

/// Opaque handle to one peer connection.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ChannelId(pub u64);

impl ChannelId {
    /// The local node itself.
    pub const LOOPBACK: Self = Self(0);
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Channel({})", self.0)
    }
}

/// A peer that has proven it votes for `account`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeerRepresentative {
    pub account: Account,
    pub channel: ChannelId,
}

pub trait Network: Send + Sync {
    /// Representatives currently reachable, one entry per voting account.
    fn representatives(&self) -> Vec<PeerRepresentative>;

    /// Number of peers a flood reaches at `scale` (1.0 = full fanout).
    fn fanout(&self, scale: f32) -> usize;

    /// Queue `message` on `channel`. Returns `false` if the channel dropped it.
    fn send(&self, channel: ChannelId, message: &Message) -> bool;

    /// Whether `channel`'s outbound queue is saturated.
    fn channel_full(&self, channel: ChannelId) -> bool;

    /// Send `message` to a random subset of `fanout(scale)` peers.
    fn flood(&self, message: &Message, scale: f32);

    /// Forget that `block` was already published so a later republish is not
    /// filtered as a duplicate.
    fn clear_publish_filter(&self, block: &Block);
}
