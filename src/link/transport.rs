//! Radio transport - peer-table management and datagram send.
//!
//! `RadioDriver` is the raw primitive (ESP-NOW on target, an in-memory
//! table in tests). `RadioTransport` layers the link's contract on top:
//!
//! - adding a peer that already exists is not an error (delete-then-add);
//! - a full peer table evicts everything except the active peer and the
//!   add is retried once before failing;
//! - sending to an address with no peer entry fails with `UnknownPeer`.

use crate::config::MAX_RADIO_PEERS;
use crate::error::{DriverError, Error, Result};
use crate::link::keys::{derive_link_key, LinkKey};
use crate::link::message::ProtocolMessage;
use crate::link::PeerAddress;
use heapless::Vec;

/// Raw peer-table + datagram primitive of a connectionless radio.
#[allow(async_fn_in_trait)]
pub trait RadioDriver {
    /// Register `peer`. With `key`, frames to/from the peer are encrypted.
    fn add_peer(
        &mut self,
        peer: PeerAddress,
        key: Option<&LinkKey>,
    ) -> core::result::Result<(), DriverError>;

    fn remove_peer(&mut self, peer: &PeerAddress) -> core::result::Result<(), DriverError>;

    fn peer_exists(&self, peer: &PeerAddress) -> bool;

    /// Snapshot of every registered peer.
    fn peers(&self) -> Vec<PeerAddress, MAX_RADIO_PEERS>;

    /// Send one datagram to `dst`, resolving once the radio reports the
    /// outcome.
    async fn send(
        &mut self,
        dst: &PeerAddress,
        data: &[u8],
    ) -> core::result::Result<(), DriverError>;
}

/// Peer-table owner for the link. Mutated only by the link task.
pub struct RadioTransport<D> {
    driver: D,
    own: PeerAddress,
    psk: [u8; 16],
    active: Option<PeerAddress>,
}

impl<D: RadioDriver> RadioTransport<D> {
    pub fn new(driver: D, own: PeerAddress, psk: &[u8; 16]) -> Self {
        Self {
            driver,
            own,
            psk: *psk,
            active: None,
        }
    }

    pub fn own_address(&self) -> PeerAddress {
        self.own
    }

    /// The designated peer, if one has been paired or restored.
    pub fn active_peer(&self) -> Option<PeerAddress> {
        self.active
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn is_registered(&self, peer: &PeerAddress) -> bool {
        self.driver.peer_exists(peer)
    }

    /// Register `peer`, deriving its link key when `encrypted`.
    pub fn add_peer(&mut self, peer: PeerAddress, encrypted: bool, make_active: bool) -> Result<()> {
        if !peer.is_unicast() || peer == self.own {
            warn!("Refusing to register {} as peer", peer);
            return Err(Error::InvalidArgument);
        }

        let key = encrypted.then(|| derive_link_key(&self.own, &peer, &self.psk));
        self.register(peer, key.as_ref())?;

        if make_active {
            self.active = Some(peer);
        }
        debug!("Peer {} registered (encrypted={})", peer, encrypted);
        Ok(())
    }

    /// Register the unencrypted broadcast peer used for discovery.
    pub fn add_broadcast_peer(&mut self) -> Result<()> {
        self.register(PeerAddress::BROADCAST, None)
    }

    /// Make an already registered peer the designated one.
    pub fn set_active_peer(&mut self, peer: PeerAddress) -> Result<()> {
        if !self.driver.peer_exists(&peer) {
            return Err(Error::UnknownPeer);
        }
        self.active = Some(peer);
        Ok(())
    }

    /// Remove one peer entry. Removing the active peer also clears it.
    pub fn remove_peer(&mut self, peer: &PeerAddress) -> Result<()> {
        match self.driver.remove_peer(peer) {
            Ok(()) | Err(DriverError::PeerNotFound) => {}
            Err(e) => return Err(e.into()),
        }
        if self.active.as_ref() == Some(peer) {
            self.active = None;
        }
        Ok(())
    }

    /// Drop every peer entry except `keep`. Returns how many were removed.
    pub fn delete_all_peers_except(&mut self, keep: Option<PeerAddress>) -> usize {
        let mut removed = 0;
        for peer in self.driver.peers() {
            if Some(peer) == keep {
                continue;
            }
            match self.driver.remove_peer(&peer) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove peer {}: {:?}", peer, e),
            }
        }
        if self.active.is_some() && self.active != keep {
            self.active = None;
        }
        removed
    }

    /// Encode and send `msg` to `dst`.
    pub async fn send(&mut self, dst: &PeerAddress, msg: &ProtocolMessage) -> Result<()> {
        if !self.driver.peer_exists(dst) {
            return Err(Error::UnknownPeer);
        }
        let bytes = msg.encode();
        self.driver.send(dst, &bytes).await.map_err(Error::from)
    }

    fn register(&mut self, peer: PeerAddress, key: Option<&LinkKey>) -> Result<()> {
        if self.driver.peer_exists(&peer) {
            match self.driver.remove_peer(&peer) {
                Ok(()) | Err(DriverError::PeerNotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }

        match self.driver.add_peer(peer, key) {
            Ok(()) => Ok(()),
            Err(DriverError::PeerTableFull) => {
                let keep = self.active;
                let evicted = self.delete_all_peers_except(keep);
                warn!("Peer table full - evicted {} peers, retrying", evicted);
                self.driver.add_peer(peer, key).map_err(|e| match e {
                    DriverError::PeerTableFull => Error::ResourceExhausted,
                    other => other.into(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}
