//! Command dispatcher - GET / SET against the config store.
//!
//! A reassembled message is
//!
//! ```text
//! [type:1][kind:1][seq:2 LE][payload_len:2 LE] payload
//! payload = [opcode:1 (0=GET, 1=SET)][key_len:1][key][data (SET only)]
//! ```
//!
//! and always yields exactly one 48-byte response report:
//!
//! ```text
//! [type=Response][kind][seq][payload_len] [status: i32 LE][data (GET only)] 0-padding
//! ```
//!
//! Only a message too short to carry the header is refused outright; every
//! other failure is reported through the status code.

use crate::config::{HOST_REPORT_SIZE, MAX_CONFIG_KEY_LEN};
use crate::error::{status, Error, Result};
use crate::host::store::{ConfigKind, ConfigStore};

/// Wire header length.
pub const HEADER_LEN: usize = 6;

const STATUS_LEN: usize = 4;

/// Largest GET value that fits in one response report.
pub const MAX_RESPONSE_DATA: usize = HOST_REPORT_SIZE - HEADER_LEN - STATUS_LEN;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MessageType {
    Request = 0,
    Response = 1,
    Notify = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Opcode {
    Get,
    Set,
}

impl Opcode {
    fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(Opcode::Get),
            1 => Some(Opcode::Set),
            _ => None,
        }
    }
}

/// Message header shared by requests and responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WireHeader {
    pub msg_type: u8,
    pub kind: u8,
    pub seq: u16,
    pub payload_len: u16,
}

impl WireHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let h = bytes.get(..HEADER_LEN).ok_or(Error::InvalidArgument)?;
        Ok(Self {
            msg_type: h[0],
            kind: h[1],
            seq: u16::from_le_bytes([h[2], h[3]]),
            payload_len: u16::from_le_bytes([h[4], h[5]]),
        })
    }

    pub fn write(&self, out: &mut [u8; HEADER_LEN]) {
        out[0] = self.msg_type;
        out[1] = self.kind;
        out[2..4].copy_from_slice(&self.seq.to_le_bytes());
        out[4..6].copy_from_slice(&self.payload_len.to_le_bytes());
    }
}

/// A parsed GET / SET command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Command<'a> {
    pub opcode: Opcode,
    pub key: &'a str,
    /// SET value; empty for GET.
    pub data: &'a [u8],
}

impl<'a> Command<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let [opcode, key_len, rest @ ..] = payload else {
            return Err(Error::InvalidArgument);
        };
        let opcode = Opcode::from_u8(*opcode).ok_or(Error::InvalidArgument)?;
        let key_len = *key_len as usize;
        if key_len == 0 || key_len > MAX_CONFIG_KEY_LEN || rest.len() < key_len {
            return Err(Error::InvalidArgument);
        }
        let (key, data) = rest.split_at(key_len);
        let key = core::str::from_utf8(key).map_err(|_| Error::InvalidArgument)?;
        Ok(Self { opcode, key, data })
    }
}

/// One response report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    raw: [u8; HOST_REPORT_SIZE],
}

impl Response {
    fn new(kind: u8, seq: u16, status: i32, data: &[u8]) -> Self {
        let mut raw = [0u8; HOST_REPORT_SIZE];
        let header = WireHeader {
            msg_type: MessageType::Response as u8,
            kind,
            seq,
            payload_len: (STATUS_LEN + data.len()) as u16,
        };
        let mut head = [0u8; HEADER_LEN];
        header.write(&mut head);
        raw[..HEADER_LEN].copy_from_slice(&head);
        raw[HEADER_LEN..HEADER_LEN + STATUS_LEN].copy_from_slice(&status.to_le_bytes());
        let start = HEADER_LEN + STATUS_LEN;
        raw[start..start + data.len()].copy_from_slice(data);
        Self { raw }
    }

    pub fn as_bytes(&self) -> &[u8; HOST_REPORT_SIZE] {
        &self.raw
    }

    pub fn header(&self) -> WireHeader {
        WireHeader {
            msg_type: self.raw[0],
            kind: self.raw[1],
            seq: u16::from_le_bytes([self.raw[2], self.raw[3]]),
            payload_len: u16::from_le_bytes([self.raw[4], self.raw[5]]),
        }
    }

    pub fn status(&self) -> i32 {
        let s = &self.raw[HEADER_LEN..HEADER_LEN + STATUS_LEN];
        i32::from_le_bytes([s[0], s[1], s[2], s[3]])
    }

    /// GET value bytes (empty for SET and failures).
    pub fn data(&self) -> &[u8] {
        let len = self.header().payload_len as usize - STATUS_LEN;
        let start = HEADER_LEN + STATUS_LEN;
        &self.raw[start..start + len]
    }
}

pub struct CommandDispatcher<S> {
    store: S,
}

impl<S: ConfigStore> CommandDispatcher<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Execute one reassembled message and build its response.
    pub async fn dispatch(&mut self, message: &[u8]) -> Result<Response> {
        let header = WireHeader::parse(message)?;
        let mut value = [0u8; MAX_RESPONSE_DATA];

        let response = match self.execute(&header, &message[HEADER_LEN..], &mut value).await {
            Ok(len) => Response::new(header.kind, header.seq, status::OK, &value[..len]),
            Err(e) => {
                warn!("Command seq={} failed: {}", header.seq, e);
                Response::new(header.kind, header.seq, e.status_code(), &[])
            }
        };
        Ok(response)
    }

    async fn execute(
        &mut self,
        header: &WireHeader,
        body: &[u8],
        value: &mut [u8; MAX_RESPONSE_DATA],
    ) -> Result<usize> {
        if header.msg_type != MessageType::Request as u8 {
            return Err(Error::InvalidArgument);
        }
        let payload = body
            .get(..header.payload_len as usize)
            .ok_or(Error::InvalidArgument)?;
        let kind = ConfigKind::from_u8(header.kind).ok_or(Error::InvalidArgument)?;
        let cmd = Command::parse(payload)?;

        match cmd.opcode {
            Opcode::Get => {
                debug!("GET {:?}/{}", kind, cmd.key);
                self.store.get(kind, cmd.key, value).await
            }
            Opcode::Set => {
                debug!("SET {:?}/{} ({} bytes)", kind, cmd.key, cmd.data.len());
                self.store.set(kind, cmd.key, cmd.data).await?;
                Ok(0)
            }
        }
    }
}

/// Build a request message into `out`, returning its length.
///
/// Used by host-side tooling and tests.
pub fn encode_request(
    out: &mut [u8],
    kind: ConfigKind,
    seq: u16,
    opcode: Opcode,
    key: &str,
    data: &[u8],
) -> Result<usize> {
    if key.is_empty() || key.len() > MAX_CONFIG_KEY_LEN {
        return Err(Error::InvalidArgument);
    }
    let payload_len = 2 + key.len() + data.len();
    let total = HEADER_LEN + payload_len;
    let out = out.get_mut(..total).ok_or(Error::ResourceExhausted)?;
    let payload_len = u16::try_from(payload_len).map_err(|_| Error::ResourceExhausted)?;

    let mut head = [0u8; HEADER_LEN];
    WireHeader {
        msg_type: MessageType::Request as u8,
        kind: kind.code(),
        seq,
        payload_len,
    }
    .write(&mut head);
    out[..HEADER_LEN].copy_from_slice(&head);
    out[HEADER_LEN] = match opcode {
        Opcode::Get => 0,
        Opcode::Set => 1,
    };
    out[HEADER_LEN + 1] = key.len() as u8;
    let key_end = HEADER_LEN + 2 + key.len();
    out[HEADER_LEN + 2..key_end].copy_from_slice(key.as_bytes());
    out[key_end..].copy_from_slice(data);
    Ok(total)
}
