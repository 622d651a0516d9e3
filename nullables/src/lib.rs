//! Nullable infrastructure for deterministic testing.
//!
//! Inspired by the "A-frame architecture" pattern from RsNano.
//! The election core reaches the outside world through a monotonic clock and
//! an outbound network. This crate provides implementations of both that:
//! - Return deterministic values
//! - Can be controlled programmatically
//! - Never touch the network
//!
//! Usage: swap real implementations for nullables in tests.

pub mod clock;
pub mod network;

pub use clock::SteadyClock;
pub use network::NullNetwork;
