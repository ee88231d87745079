//! keylink - protocol cores of a split wireless keyboard.
//!
//! This library carries everything that can be tested on the host:
//!
//! - `link` - the ESP-NOW peer link (message codec, link key derivation,
//!   peer-table transport, pairing / liveness state machine);
//! - `host` - the USB comm protocol (frame codec, reassembly, GET / SET
//!   dispatch into the config store).
//!
//! Usage: `cargo test --lib` (host) or
//! `cargo build --release --features embedded --target xtensa-esp32s3-none-elf`.
//!
//! Note: The embedded binary (main.rs) wires these cores to the radio,
//! USB and flash drivers; it is only built with the `embedded` feature.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod config;
pub mod error;
pub mod host;
pub mod link;

pub use error::{Error, Result};
pub use host::{CommandDispatcher, ConfigKind, ConfigStore, FrameReassembler, HostFrame};
pub use link::{LinkEvent, LinkState, LinkStateMachine, PeerAddress, ProtocolMessage};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{status, DriverError};

    // ═══════════════════════════════════════════════════════════════════════
    // Error Tests
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn status_codes_match_host_tooling() {
        assert_eq!(Error::InvalidArgument.status_code(), 0x102);
        assert_eq!(Error::NotFound.status_code(), 0x1102);
        assert_eq!(Error::Timeout.status_code(), 0x107);
        assert_eq!(Error::ResourceExhausted.status_code(), 0x101);
        assert_eq!(Error::IntegrityFailure.status_code(), 0x109);
        assert_eq!(Error::Storage.status_code(), status::FAIL);
        assert_eq!(Error::TransportFailure.status_code(), -1);
        assert_eq!(Error::UnknownPeer.status_code(), -1);
    }

    #[test]
    fn driver_errors_map_into_error() {
        assert_eq!(Error::from(DriverError::PeerTableFull), Error::ResourceExhausted);
        assert_eq!(Error::from(DriverError::PeerNotFound), Error::UnknownPeer);
        assert_eq!(Error::from(DriverError::PeerExists), Error::TransportFailure);
        assert_eq!(Error::from(DriverError::Raw(0x3069)), Error::TransportFailure);
    }

    #[test]
    fn error_display_is_human_readable() {
        assert_eq!(Error::IntegrityFailure.to_string(), "integrity failure");
        assert_eq!(Error::UnknownPeer.to_string(), "unknown peer");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Address / State Tests
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn peer_address_displays_colon_hex() {
        let addr = PeerAddress::new([0x24, 0x6F, 0x28, 0xAB, 0x0C, 0x01]);
        assert_eq!(addr.to_string(), "24:6F:28:AB:0C:01");
    }

    #[test]
    fn broadcast_is_never_unicast() {
        assert!(PeerAddress::BROADCAST.is_broadcast());
        assert!(!PeerAddress::BROADCAST.is_unicast());
        assert!(!PeerAddress::new([0; 6]).is_unicast());
        assert!(!PeerAddress::new([0x33, 0x33, 0, 0, 0, 1]).is_unicast());
        assert!(PeerAddress::new([0x24, 0x6F, 0x28, 0, 0, 1]).is_unicast());
    }

    #[test]
    fn link_state_names() {
        assert_eq!(LinkState::Idle.to_string(), "IDLE");
        assert_eq!(LinkState::LinkLost.as_str(), "LINK_LOST");
    }
}
