//! In-memory `RadioDriver` for host tests and link simulations.
//!
//! Keeps a bounded peer table (with the key each peer was registered
//! with) and an outbox of sent datagrams. Two machines can be wired
//! back-to-back by draining one outbox into the other's `handle_frame`.
//!
//! Each datagram records the link key it was sent with. `accepts` applies
//! the receiving radio's rule: an encrypted datagram only decrypts when
//! the receiver holds the same key for the sender.

use crate::config::{MAX_MESSAGE_LEN, MAX_RADIO_PEERS};
use crate::error::DriverError;
use crate::link::keys::{LinkKey, LINK_KEY_LEN};
use crate::link::message::ProtocolMessage;
use crate::link::transport::RadioDriver;
use crate::link::PeerAddress;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use heapless::{Deque, Vec};

/// Outbox depth. Oldest datagrams are dropped once full.
pub const OUTBOX_DEPTH: usize = 64;

/// One datagram handed to the radio.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    pub dst: PeerAddress,
    pub data: Vec<u8, MAX_MESSAGE_LEN>,
    /// Link key of the destination's peer entry; `None` when sent in clear.
    pub key: Option<[u8; LINK_KEY_LEN]>,
}

impl Datagram {
    pub fn message(&self) -> Option<ProtocolMessage> {
        ProtocolMessage::decode(&self.data)
    }
}

#[derive(Clone)]
struct PeerEntry {
    addr: PeerAddress,
    key: Option<[u8; LINK_KEY_LEN]>,
}

pub struct MockRadio {
    peers: Vec<PeerEntry, MAX_RADIO_PEERS>,
    capacity: usize,
    outbox: Deque<Datagram, OUTBOX_DEPTH>,
    fail_sends: bool,
    yield_sends: bool,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::with_capacity(MAX_RADIO_PEERS)
    }

    /// Peer table limited to `capacity` entries (clamped to `MAX_RADIO_PEERS`).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            peers: Vec::new(),
            capacity: capacity.min(MAX_RADIO_PEERS),
            outbox: Deque::new(),
            fail_sends: false,
            yield_sends: false,
        }
    }

    /// Make every subsequent `send` fail with a raw driver error.
    pub fn set_fail_sends(&mut self, fail: bool) {
        self.fail_sends = fail;
    }

    /// Make every subsequent `send` return `Pending` once before it
    /// completes, like a radio waiting for its send callback.
    pub fn set_yield_sends(&mut self, yield_sends: bool) {
        self.yield_sends = yield_sends;
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Key the peer was registered with; `None` if absent or unencrypted.
    pub fn key_for(&self, peer: &PeerAddress) -> Option<[u8; LINK_KEY_LEN]> {
        self.peers
            .iter()
            .find(|e| e.addr == *peer)
            .and_then(|e| e.key)
    }

    /// Whether this radio can decrypt `datagram` coming from `src`.
    pub fn accepts(&self, src: &PeerAddress, datagram: &Datagram) -> bool {
        match datagram.key {
            None => true,
            Some(key) => self.key_for(src) == Some(key),
        }
    }

    /// Oldest unsent-to-test datagram.
    pub fn pop_sent(&mut self) -> Option<Datagram> {
        self.outbox.pop_front()
    }

    pub fn sent_count(&self) -> usize {
        self.outbox.len()
    }

    pub fn clear_sent(&mut self) {
        self.outbox.clear();
    }
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioDriver for MockRadio {
    fn add_peer(
        &mut self,
        peer: PeerAddress,
        key: Option<&LinkKey>,
    ) -> core::result::Result<(), DriverError> {
        if self.peer_exists(&peer) {
            return Err(DriverError::PeerExists);
        }
        if self.peers.len() >= self.capacity {
            return Err(DriverError::PeerTableFull);
        }
        self.peers
            .push(PeerEntry {
                addr: peer,
                key: key.map(|k| *k.as_bytes()),
            })
            .map_err(|_| DriverError::PeerTableFull)
    }

    fn remove_peer(&mut self, peer: &PeerAddress) -> core::result::Result<(), DriverError> {
        let idx = self
            .peers
            .iter()
            .position(|e| e.addr == *peer)
            .ok_or(DriverError::PeerNotFound)?;
        self.peers.swap_remove(idx);
        Ok(())
    }

    fn peer_exists(&self, peer: &PeerAddress) -> bool {
        self.peers.iter().any(|e| e.addr == *peer)
    }

    fn peers(&self) -> Vec<PeerAddress, MAX_RADIO_PEERS> {
        self.peers.iter().map(|e| e.addr).collect()
    }

    async fn send(
        &mut self,
        dst: &PeerAddress,
        data: &[u8],
    ) -> core::result::Result<(), DriverError> {
        if self.yield_sends {
            YieldOnce(false).await;
        }
        if self.fail_sends {
            return Err(DriverError::Raw(0x3066));
        }
        let entry = self
            .peers
            .iter()
            .find(|e| e.addr == *dst)
            .ok_or(DriverError::PeerNotFound)?;
        let key = entry.key;
        let data = Vec::from_slice(data).map_err(|_| DriverError::Raw(0x102))?;
        if self.outbox.is_full() {
            self.outbox.pop_front();
        }
        let _ = self.outbox.push_back(Datagram {
            dst: *dst,
            data,
            key,
        });
        Ok(())
    }
}

struct YieldOnce(bool);

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0 {
            return Poll::Ready(());
        }
        self.0 = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
