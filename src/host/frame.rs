//! Host comm frame codec.
//!
//! Every comm report is exactly `HOST_REPORT_SIZE` (48) bytes:
//!
//! ```text
//! offset  size  field
//!      0     1  flags        one of FIRST/MID/LAST/ACK/NAK/OK/ERR/ABORT
//!      1     2  remaining    frames still to come after this one (LE)
//!      3     1  payload_len  0..=43
//!      4    43  payload      bytes past payload_len are zero
//!     47     1  checksum     CRC-8 (poly 0x07, init 0) over bytes 0..47
//! ```

use crate::config::{HOST_REPORT_SIZE, MAX_FRAME_PAYLOAD};
use crate::error::{Error, Result};
use crc::{Crc, CRC_8_SMBUS};
use heapless::Vec;

/// A raw comm report.
pub type RawFrame = [u8; HOST_REPORT_SIZE];

const HEADER_LEN: usize = 4;
const CHECKSUM_OFFSET: usize = HOST_REPORT_SIZE - 1;

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// Frame flag. Exactly one is set per frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FrameFlag {
    First = 0x80,
    Mid = 0x40,
    Last = 0x20,
    Ack = 0x10,
    Nak = 0x08,
    Ok = 0x04,
    Err = 0x02,
    Abort = 0x01,
}

impl FrameFlag {
    pub fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            0x80 => FrameFlag::First,
            0x40 => FrameFlag::Mid,
            0x20 => FrameFlag::Last,
            0x10 => FrameFlag::Ack,
            0x08 => FrameFlag::Nak,
            0x04 => FrameFlag::Ok,
            0x02 => FrameFlag::Err,
            0x01 => FrameFlag::Abort,
            _ => return None,
        })
    }

    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// `true` for FIRST / MID / LAST.
    pub fn is_data(self) -> bool {
        matches!(self, FrameFlag::First | FrameFlag::Mid | FrameFlag::Last)
    }
}

/// One decoded comm frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostFrame {
    flag: FrameFlag,
    remaining: u16,
    payload: Vec<u8, MAX_FRAME_PAYLOAD>,
}

impl HostFrame {
    /// Data frame carrying up to `MAX_FRAME_PAYLOAD` bytes.
    pub fn data(flag: FrameFlag, remaining: u16, payload: &[u8]) -> Result<Self> {
        let payload = Vec::from_slice(payload).map_err(|_| Error::InvalidArgument)?;
        Ok(Self {
            flag,
            remaining,
            payload,
        })
    }

    /// Payload-less control frame (ACK, NAK, ABORT, ...).
    pub fn control(flag: FrameFlag) -> Self {
        Self {
            flag,
            remaining: 0,
            payload: Vec::new(),
        }
    }

    pub fn flag(&self) -> FrameFlag {
        self.flag
    }

    pub fn remaining(&self) -> u16 {
        self.remaining
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serialise into a report with the checksum filled in.
    pub fn encode(&self) -> RawFrame {
        let mut raw = [0u8; HOST_REPORT_SIZE];
        raw[0] = self.flag.bits();
        raw[1..3].copy_from_slice(&self.remaining.to_le_bytes());
        raw[3] = self.payload.len() as u8;
        raw[HEADER_LEN..HEADER_LEN + self.payload.len()].copy_from_slice(&self.payload);
        seal(&mut raw);
        raw
    }

    /// Parse and validate one report. The checksum is checked first.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let raw: &RawFrame = raw.try_into().map_err(|_| Error::InvalidArgument)?;
        if !verify(raw) {
            return Err(Error::IntegrityFailure);
        }

        let len = raw[3] as usize;
        if len > MAX_FRAME_PAYLOAD {
            return Err(Error::InvalidArgument);
        }
        let flag = FrameFlag::from_bits(raw[0]).ok_or(Error::InvalidArgument)?;
        let remaining = u16::from_le_bytes([raw[1], raw[2]]);

        Self::data(flag, remaining, &raw[HEADER_LEN..HEADER_LEN + len])
    }
}

/// Split `message` into the frames a host sends for it: a lone LAST, or
/// FIRST, MID.., LAST with `remaining` counting down to zero.
pub fn split_message(message: &[u8]) -> impl Iterator<Item = HostFrame> + '_ {
    let count = message.len().div_ceil(MAX_FRAME_PAYLOAD).max(1);
    (0..count).map(move |i| {
        let start = i * MAX_FRAME_PAYLOAD;
        let end = (start + MAX_FRAME_PAYLOAD).min(message.len());
        let flag = if i + 1 == count {
            FrameFlag::Last
        } else if i == 0 {
            FrameFlag::First
        } else {
            FrameFlag::Mid
        };
        HostFrame {
            flag,
            remaining: (count - i - 1) as u16,
            payload: Vec::from_slice(&message[start..end]).unwrap_or_default(),
        }
    })
}

/// CRC-8 of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    CRC8.checksum(bytes)
}

/// Write the checksum byte of a report.
pub fn seal(raw: &mut RawFrame) {
    raw[CHECKSUM_OFFSET] = checksum(&raw[..CHECKSUM_OFFSET]);
}

/// `true` if the checksum byte matches the rest of the report.
pub fn verify(raw: &RawFrame) -> bool {
    raw[CHECKSUM_OFFSET] == checksum(&raw[..CHECKSUM_OFFSET])
}
