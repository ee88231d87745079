//! `RadioDriver` over the esp-wifi ESP-NOW stack.
//!
//! Every peer is pinned to `ESPNOW_CHANNEL`. Encrypted peers carry their
//! derived link key as the ESP-NOW local master key; the primary master
//! key is set once when the driver is created.

use defmt::{debug, Debug2Format};
use esp_wifi::esp_now::{
    Error as EspNowCode, EspNowError, EspNowManager, EspNowSender, PeerInfo,
};
use heapless::Vec;
use keylink::config::{ESPNOW_CHANNEL, ESPNOW_PMK, MAX_RADIO_PEERS};
use keylink::error::DriverError;
use keylink::link::{LinkKey, PeerAddress, RadioDriver};

pub struct EspNowDriver {
    manager: EspNowManager<'static>,
    sender: EspNowSender<'static>,
}

impl EspNowDriver {
    pub fn new(
        manager: EspNowManager<'static>,
        sender: EspNowSender<'static>,
    ) -> Result<Self, EspNowError> {
        manager.set_channel(ESPNOW_CHANNEL)?;
        manager.set_pmk(ESPNOW_PMK)?;
        Ok(Self { manager, sender })
    }
}

fn driver_error(e: EspNowError) -> DriverError {
    match e {
        EspNowError::Error(EspNowCode::PeerListFull) => DriverError::PeerTableFull,
        EspNowError::Error(EspNowCode::PeerExists) => DriverError::PeerExists,
        EspNowError::Error(EspNowCode::NotFound) => DriverError::PeerNotFound,
        EspNowError::Error(EspNowCode::Other(code)) => DriverError::Raw(code),
        other => {
            debug!("ESP-NOW error: {:?}", Debug2Format(&other));
            DriverError::Raw(0)
        }
    }
}

impl RadioDriver for EspNowDriver {
    fn add_peer(&mut self, peer: PeerAddress, key: Option<&LinkKey>) -> Result<(), DriverError> {
        self.manager
            .add_peer(PeerInfo {
                peer_address: *peer.bytes(),
                lmk: key.map(|k| *k.as_bytes()),
                channel: Some(ESPNOW_CHANNEL),
                encrypt: key.is_some(),
            })
            .map_err(driver_error)
    }

    fn remove_peer(&mut self, peer: &PeerAddress) -> Result<(), DriverError> {
        self.manager.remove_peer(peer.bytes()).map_err(driver_error)
    }

    fn peer_exists(&self, peer: &PeerAddress) -> bool {
        self.manager.peer_exists(peer.bytes())
    }

    fn peers(&self) -> Vec<PeerAddress, MAX_RADIO_PEERS> {
        let mut peers = Vec::new();
        let mut from_head = true;
        while let Ok(info) = self.manager.fetch_peer(from_head) {
            from_head = false;
            if peers.push(PeerAddress::new(info.peer_address)).is_err() {
                break;
            }
        }
        peers
    }

    async fn send(&mut self, dst: &PeerAddress, data: &[u8]) -> Result<(), DriverError> {
        self.sender
            .send_async(dst.bytes(), data)
            .await
            .map_err(driver_error)
    }
}
