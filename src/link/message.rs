//! Link protocol messages.
//!
//! Layout: 1-byte tag followed by a fixed, variant-specific payload.
//! ```text
//! Discovery .. ReconnectAck, Toggle : [tag]
//! Ping / Pong                      : [tag][timestamp: u64 LE, µs]
//! KeyboardState                    : [tag][data: 31 bytes]
//! ```
//! There is no length prefix - one message per radio datagram.

use crate::config::{KEYBOARD_STATE_LEN, MAX_MESSAGE_LEN};
use heapless::Vec;

const TAG_DISCOVERY: u8 = 1;
const TAG_DISCOVERY_ACK: u8 = 2;
const TAG_SECURE: u8 = 3;
const TAG_SECURE_ACK: u8 = 4;
const TAG_RECONNECT: u8 = 5;
const TAG_RECONNECT_ACK: u8 = 6;
const TAG_PING: u8 = 7;
const TAG_PONG: u8 = 8;
const TAG_TOGGLE: u8 = 9;
const TAG_KEYBOARD_STATE: u8 = 10;

const TIMESTAMP_LEN: usize = 8;

/// A decoded link protocol message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolMessage {
    Discovery,
    DiscoveryAck,
    Secure,
    SecureAck,
    Reconnect,
    ReconnectAck,
    /// Sender's local monotonic time in µs.
    Ping { timestamp: u64 },
    /// Echo of the timestamp carried by the matching `Ping`.
    Pong { timestamp: u64 },
    Toggle,
    KeyboardState { data: [u8; KEYBOARD_STATE_LEN] },
}

/// Encoded message bytes.
pub type EncodedMessage = Vec<u8, MAX_MESSAGE_LEN>;

impl ProtocolMessage {
    fn tag(&self) -> u8 {
        match self {
            ProtocolMessage::Discovery => TAG_DISCOVERY,
            ProtocolMessage::DiscoveryAck => TAG_DISCOVERY_ACK,
            ProtocolMessage::Secure => TAG_SECURE,
            ProtocolMessage::SecureAck => TAG_SECURE_ACK,
            ProtocolMessage::Reconnect => TAG_RECONNECT,
            ProtocolMessage::ReconnectAck => TAG_RECONNECT_ACK,
            ProtocolMessage::Ping { .. } => TAG_PING,
            ProtocolMessage::Pong { .. } => TAG_PONG,
            ProtocolMessage::Toggle => TAG_TOGGLE,
            ProtocolMessage::KeyboardState { .. } => TAG_KEYBOARD_STATE,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolMessage::Discovery => "DISCOVERY",
            ProtocolMessage::DiscoveryAck => "DISCOVERY_ACK",
            ProtocolMessage::Secure => "SECURE",
            ProtocolMessage::SecureAck => "SECURE_ACK",
            ProtocolMessage::Reconnect => "RECONNECT",
            ProtocolMessage::ReconnectAck => "RECONNECT_ACK",
            ProtocolMessage::Ping { .. } => "PING",
            ProtocolMessage::Pong { .. } => "PONG",
            ProtocolMessage::Toggle => "TOGGLE",
            ProtocolMessage::KeyboardState { .. } => "KB_STATE",
        }
    }

    /// Serialise into the wire layout.
    pub fn encode(&self) -> EncodedMessage {
        let mut out = EncodedMessage::new();
        // Capacity is MAX_MESSAGE_LEN, the largest variant; pushes cannot fail.
        let _ = out.push(self.tag());
        match self {
            ProtocolMessage::Ping { timestamp } | ProtocolMessage::Pong { timestamp } => {
                let _ = out.extend_from_slice(&timestamp.to_le_bytes());
            }
            ProtocolMessage::KeyboardState { data } => {
                let _ = out.extend_from_slice(data);
            }
            _ => {}
        }
        out
    }

    /// Parse one datagram. Returns `None` for an unknown tag or a length
    /// that does not match the variant exactly.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let (&tag, body) = data.split_first()?;
        let msg = match tag {
            TAG_DISCOVERY => ProtocolMessage::Discovery,
            TAG_DISCOVERY_ACK => ProtocolMessage::DiscoveryAck,
            TAG_SECURE => ProtocolMessage::Secure,
            TAG_SECURE_ACK => ProtocolMessage::SecureAck,
            TAG_RECONNECT => ProtocolMessage::Reconnect,
            TAG_RECONNECT_ACK => ProtocolMessage::ReconnectAck,
            TAG_TOGGLE => ProtocolMessage::Toggle,
            TAG_PING => {
                return read_timestamp(body).map(|timestamp| ProtocolMessage::Ping { timestamp })
            }
            TAG_PONG => {
                return read_timestamp(body).map(|timestamp| ProtocolMessage::Pong { timestamp })
            }
            TAG_KEYBOARD_STATE => {
                let data: [u8; KEYBOARD_STATE_LEN] = body.try_into().ok()?;
                return Some(ProtocolMessage::KeyboardState { data });
            }
            _ => return None,
        };
        body.is_empty().then_some(msg)
    }
}

fn read_timestamp(body: &[u8]) -> Option<u64> {
    let raw: [u8; TIMESTAMP_LEN] = body.try_into().ok()?;
    Some(u64::from_le_bytes(raw))
}
