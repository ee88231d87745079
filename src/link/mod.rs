//! ESP-NOW peer link subsystem.
//!
//! 1. **Message** - wire codec for the link protocol datagrams.
//! 2. **Keys** - per-pair link key derivation from both addresses + PSK.
//! 3. **Transport** - peer-table contract over a raw radio driver.
//! 4. **Machine** - the pairing / reconnection / liveness state machine.
//! 5. **Mock** - in-memory radio driver for host tests.
//!
//! The state machine never blocks: it is driven by `handle_frame` for
//! every inbound datagram and by `tick` at a state-dependent interval.
//! The firmware's link task owns it; other tasks only talk to it through
//! queues.

pub mod keys;
pub mod machine;
pub mod message;
pub mod mock;
pub mod transport;

#[cfg(test)]
mod tests;

use core::fmt;

pub use keys::{derive_link_key, LinkKey};
pub use machine::{LinkEvent, LinkObserver, LinkStateMachine};
pub use message::ProtocolMessage;
pub use transport::{RadioDriver, RadioTransport};

/// 6-byte hardware (MAC) address of a link participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerAddress(pub [u8; 6]);

impl PeerAddress {
    /// The all-ones broadcast address. Never a valid peer.
    pub const BROADCAST: PeerAddress = PeerAddress([0xFF; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// `true` for a usable peer: not zero, not broadcast, not multicast.
    pub fn is_unicast(&self) -> bool {
        self.0 != [0; 6] && self.0[0] & 0x01 == 0
    }
}

impl From<[u8; 6]> for PeerAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for PeerAddress {
    fn format(&self, f: defmt::Formatter) {
        let b = &self.0;
        defmt::write!(
            f,
            "{=u8:02X}:{=u8:02X}:{=u8:02X}:{=u8:02X}:{=u8:02X}:{=u8:02X}",
            b[0],
            b[1],
            b[2],
            b[3],
            b[4],
            b[5]
        )
    }
}

/// Connection state of the single link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    /// No pairing in progress and no live link.
    Idle,
    /// Broadcasting discovery, waiting for a peer to answer.
    Discovering,
    /// Encrypted peer registered, exchanging `Secure` / `SecureAck`.
    Securing,
    /// Trying to reach the known peer within a bounded window.
    Reconnecting,
    /// Link up, liveness checked with ping / pong.
    Connected,
    /// Link was up and went silent; retries until the peer answers.
    LinkLost,
}

impl LinkState {
    pub const fn as_str(self) -> &'static str {
        match self {
            LinkState::Idle => "IDLE",
            LinkState::Discovering => "DISCOVERING",
            LinkState::Securing => "SECURING",
            LinkState::Reconnecting => "RECONNECTING",
            LinkState::Connected => "CONNECTED",
            LinkState::LinkLost => "LINK_LOST",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
