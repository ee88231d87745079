//! Persistent storage in the ESP32-S3's internal flash.
//!
//! Uses `sequential-storage`'s key/value map over the `nvs` partition
//! region to hold:
//!   - config entries written by the host (`FlashConfigStore`), keyed by
//!     the composite `k<kind>_<name>` string;
//!   - the peer record - the address of the last connected peer, used to
//!     rejoin at boot.
//!
//! Keys are stored as fixed 16-byte arrays, zero padded. Composite config
//! keys always start with `k`, so they never collide with `peer`.

use core::ops::Range;
use defmt::{debug, error, info};
use embassy_embedded_hal::adapter::BlockingAsync;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use esp_storage::FlashStorage;
use keylink::config::{MAX_CONFIG_VALUE_LEN, STORAGE_FLASH_SIZE, STORAGE_FLASH_START};
use keylink::host::store::{storage_key, STORAGE_KEY_LEN};
use keylink::{ConfigKind, ConfigStore, Error, PeerAddress, Result};
use sequential_storage::cache::NoCache;
use sequential_storage::map::{fetch_item, store_item};

type FlashKey = [u8; STORAGE_KEY_LEN];

const FLASH_RANGE: Range<u32> = STORAGE_FLASH_START..STORAGE_FLASH_START + STORAGE_FLASH_SIZE;

/// Item scratch buffer: key + value, rounded up to the sector size.
const ITEM_BUF_LEN: usize = 4096;

const _: () = assert!(ITEM_BUF_LEN >= STORAGE_KEY_LEN + MAX_CONFIG_VALUE_LEN);

const PEER_KEY: FlashKey = flash_key(b"peer");

/// Zero-padded flash key. Callers guarantee `name.len() <= 16`.
const fn flash_key(name: &[u8]) -> FlashKey {
    let mut key = [0u8; STORAGE_KEY_LEN];
    let mut i = 0;
    while i < name.len() {
        key[i] = name[i];
        i += 1;
    }
    key
}

/// Flash-backed key/value map.
pub struct Storage {
    flash: BlockingAsync<FlashStorage>,
    buf: [u8; ITEM_BUF_LEN],
}

impl Storage {
    pub fn new(flash: FlashStorage) -> Self {
        Self {
            flash: BlockingAsync::new(flash),
            buf: [0u8; ITEM_BUF_LEN],
        }
    }

    /// Copy the value stored under `key` into `out`.
    async fn fetch(&mut self, key: &FlashKey, out: &mut [u8]) -> Result<Option<usize>> {
        let item = fetch_item::<FlashKey, &[u8], _>(
            &mut self.flash,
            FLASH_RANGE,
            &mut NoCache::new(),
            &mut self.buf,
            key,
        )
        .await
        .map_err(|e| {
            error!("Flash read error: {:?}", defmt::Debug2Format(&e));
            Error::Storage
        })?;

        match item {
            Some(value) if value.len() > out.len() => Err(Error::ResourceExhausted),
            Some(value) => {
                out[..value.len()].copy_from_slice(value);
                Ok(Some(value.len()))
            }
            None => Ok(None),
        }
    }

    async fn store(&mut self, key: &FlashKey, value: &[u8]) -> Result<()> {
        store_item::<FlashKey, &[u8], _>(
            &mut self.flash,
            FLASH_RANGE,
            &mut NoCache::new(),
            &mut self.buf,
            key,
            &value,
        )
        .await
        .map_err(|e| {
            error!("Flash write error: {:?}", defmt::Debug2Format(&e));
            Error::Storage
        })
    }

    /// Address of the last connected peer, if one was recorded.
    pub async fn load_peer(&mut self) -> Option<PeerAddress> {
        let mut bytes = [0u8; 6];
        match self.fetch(&PEER_KEY, &mut bytes).await {
            Ok(Some(6)) => {
                let peer = PeerAddress::new(bytes);
                info!("Loaded peer record {}", peer);
                Some(peer)
            }
            Ok(Some(n)) => {
                error!("Peer record has {} bytes - ignoring", n);
                None
            }
            Ok(None) => {
                info!("No peer record in flash");
                None
            }
            Err(_) => None,
        }
    }

    /// Record `peer`. Skips the write when the record is unchanged.
    pub async fn save_peer(&mut self, peer: PeerAddress) -> Result<()> {
        let mut current = [0u8; 6];
        if let Ok(Some(6)) = self.fetch(&PEER_KEY, &mut current).await {
            if current == *peer.bytes() {
                debug!("Peer record unchanged");
                return Ok(());
            }
        }
        self.store(&PEER_KEY, peer.bytes()).await?;
        info!("Saved peer record {}", peer);
        Ok(())
    }
}

/// `ConfigStore` over the shared flash map.
pub struct FlashConfigStore {
    storage: &'static Mutex<CriticalSectionRawMutex, Storage>,
}

impl FlashConfigStore {
    pub fn new(storage: &'static Mutex<CriticalSectionRawMutex, Storage>) -> Self {
        Self { storage }
    }
}

impl ConfigStore for FlashConfigStore {
    async fn get(&mut self, kind: ConfigKind, name: &str, out: &mut [u8]) -> Result<usize> {
        let key = storage_key(kind, name)?;
        self.storage
            .lock()
            .await
            .fetch(&flash_key(key.as_bytes()), out)
            .await?
            .ok_or(Error::NotFound)
    }

    async fn set(&mut self, kind: ConfigKind, name: &str, value: &[u8]) -> Result<()> {
        if value.len() > MAX_CONFIG_VALUE_LEN {
            return Err(Error::ResourceExhausted);
        }
        let key = storage_key(kind, name)?;
        self.storage
            .lock()
            .await
            .store(&flash_key(key.as_bytes()), value)
            .await
    }
}
