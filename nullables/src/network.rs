//! Nullable network: record messages without sending them.

use orv_messages::{ChannelId, Message, MessageType, Network, PeerRepresentative};
use orv_types::{Account, Block, BlockHash};
use std::collections::HashSet;
use std::sync::Mutex;

/// A test network that records messages instead of sending them.
///
/// Representatives and saturated channels are configured up front; every
/// `send` and `flood` is kept for assertions.
pub struct NullNetwork {
    state: Mutex<NullNetworkState>,
}

#[derive(Default)]
struct NullNetworkState {
    representatives: Vec<PeerRepresentative>,
    full_channels: HashSet<ChannelId>,
    fanout: usize,
    sent: Vec<(ChannelId, Message)>,
    flooded: Vec<(Message, f32)>,
    cleared_filters: Vec<BlockHash>,
}

impl NullNetwork {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NullNetworkState {
                fanout: 8,
                ..Default::default()
            }),
        }
    }

    /// Register a representative reachable over `channel`.
    pub fn add_representative(&self, account: Account, channel: ChannelId) {
        self.lock()
            .representatives
            .push(PeerRepresentative { account, channel });
    }

    /// Make `send` on `channel` report a saturated queue.
    pub fn set_channel_full(&self, channel: ChannelId, full: bool) {
        let mut state = self.lock();
        if full {
            state.full_channels.insert(channel);
        } else {
            state.full_channels.remove(&channel);
        }
    }

    pub fn set_fanout(&self, fanout: usize) {
        self.lock().fanout = fanout;
    }

    /// Every `(channel, message)` passed to `send`, oldest first.
    pub fn sent(&self) -> Vec<(ChannelId, Message)> {
        self.lock().sent.clone()
    }

    /// Every `(message, scale)` passed to `flood`, oldest first.
    pub fn flooded(&self) -> Vec<(Message, f32)> {
        self.lock().flooded.clone()
    }

    /// Sent and flooded messages of one kind.
    pub fn count(&self, message_type: MessageType) -> usize {
        let state = self.lock();
        state
            .sent
            .iter()
            .map(|(_, m)| m)
            .chain(state.flooded.iter().map(|(m, _)| m))
            .filter(|m| m.message_type() == message_type)
            .count()
    }

    pub fn cleared_filters(&self) -> Vec<BlockHash> {
        self.lock().cleared_filters.clone()
    }

    /// Clear recorded traffic. Configuration is kept.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.sent.clear();
        state.flooded.clear();
        state.cleared_filters.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NullNetworkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for NullNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl Network for NullNetwork {
    fn representatives(&self) -> Vec<PeerRepresentative> {
        self.lock().representatives.clone()
    }

    fn fanout(&self, scale: f32) -> usize {
        ((self.lock().fanout as f32) * scale).ceil() as usize
    }

    fn send(&self, channel: ChannelId, message: &Message) -> bool {
        let mut state = self.lock();
        if state.full_channels.contains(&channel) {
            return false;
        }
        state.sent.push((channel, message.clone()));
        true
    }

    fn channel_full(&self, channel: ChannelId) -> bool {
        self.lock().full_channels.contains(&channel)
    }

    fn flood(&self, message: &Message, scale: f32) {
        self.lock().flooded.push((message.clone(), scale));
    }

    fn clear_publish_filter(&self, block: &Block) {
        self.lock().cleared_filters.push(block.hash());
    }
}
