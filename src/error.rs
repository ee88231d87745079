//! Unified error type for keylink.
//!
//! We avoid `alloc` - all error variants carry no data.
//! Implements `defmt::Format` for efficient on-target logging.

use core::fmt;

/// Top-level error type used across the library and firmware.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Malformed request shape - length, opcode, kind or address out of range.
    InvalidArgument,

    /// Config key absent from the store.
    NotFound,

    /// Pairing, rejoin or response wait exceeded its budget.
    Timeout,

    /// Buffer or table would overflow (reassembly buffer, peer table after
    /// eviction retry, response capacity).
    ResourceExhausted,

    /// The radio primitive rejected a send or peer-table operation.
    TransportFailure,

    /// Frame checksum mismatch.
    IntegrityFailure,

    /// Send to an address with no registered peer entry.
    UnknownPeer,

    /// Flash read/write failed.
    Storage,
}

/// Status codes carried in host responses (little-endian `i32`).
///
/// The values match the codes the host tooling already understands.
pub mod status {
    pub const OK: i32 = 0;
    pub const FAIL: i32 = -1;
    pub const NO_MEM: i32 = 0x101;
    pub const INVALID_ARG: i32 = 0x102;
    pub const TIMEOUT: i32 = 0x107;
    pub const INVALID_CRC: i32 = 0x109;
    pub const NOT_FOUND: i32 = 0x1102;
}

impl Error {
    /// Wire status code for this error.
    pub const fn status_code(self) -> i32 {
        match self {
            Error::InvalidArgument => status::INVALID_ARG,
            Error::NotFound => status::NOT_FOUND,
            Error::Timeout => status::TIMEOUT,
            Error::ResourceExhausted => status::NO_MEM,
            Error::IntegrityFailure => status::INVALID_CRC,
            Error::TransportFailure | Error::UnknownPeer | Error::Storage => status::FAIL,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Error::InvalidArgument => "invalid argument",
            Error::NotFound => "not found",
            Error::Timeout => "timeout",
            Error::ResourceExhausted => "resource exhausted",
            Error::TransportFailure => "transport failure",
            Error::IntegrityFailure => "integrity failure",
            Error::UnknownPeer => "unknown peer",
            Error::Storage => "storage failure",
        };
        f.write_str(s)
    }
}

/// Errors reported by a raw radio driver (peer table + datagram send).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverError {
    /// The peer table has no free slot.
    PeerTableFull,
    /// The peer is already registered.
    PeerExists,
    /// The peer is not registered.
    PeerNotFound,
    /// Any other driver failure (raw code from the radio stack).
    Raw(u32),
}

// Convenience conversions

impl From<DriverError> for Error {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::PeerTableFull => Error::ResourceExhausted,
            DriverError::PeerNotFound => Error::UnknownPeer,
            DriverError::PeerExists | DriverError::Raw(_) => Error::TransportFailure,
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, Error>;
