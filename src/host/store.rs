//! Config key/value store interface.
//!
//! Entries are addressed by `(kind, name)` and persisted under the
//! composite key `k{kind}_{name}`. SET replaces the whole value; an absent
//! key is `NotFound`, distinct from a present empty value.

use crate::config::{MAX_CONFIG_ENTRIES, MAX_CONFIG_KEY_LEN, MAX_CONFIG_VALUE_LEN};
use crate::error::{Error, Result};
use core::fmt::Write;
use heapless::{String, Vec};

/// Name written at boot so the host can check the comm path end to end.
pub const HELLO_KEY: &str = "hello";
pub const HELLO_VALUE: &[u8] = b"Hello world";

/// Longest composite key: "k" + kind digit + "_" + 12-char name.
pub const STORAGE_KEY_LEN: usize = 16;

pub type StorageKey = String<STORAGE_KEY_LEN>;

/// Config namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ConfigKind {
    Layout = 0,
    Macro = 1,
    Connection = 2,
    System = 3,
}

impl ConfigKind {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(ConfigKind::Layout),
            1 => Some(ConfigKind::Macro),
            2 => Some(ConfigKind::Connection),
            3 => Some(ConfigKind::System),
            _ => None,
        }
    }

    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Build the composite key for `(kind, name)`.
///
/// `name` must be 1..=12 bytes.
pub fn storage_key(kind: ConfigKind, name: &str) -> Result<StorageKey> {
    if name.is_empty() || name.len() > MAX_CONFIG_KEY_LEN {
        return Err(Error::InvalidArgument);
    }
    let mut key = StorageKey::new();
    write!(key, "k{}_{}", kind.code(), name).map_err(|_| Error::InvalidArgument)?;
    Ok(key)
}

/// Key/value persistence used by the command dispatcher.
#[allow(async_fn_in_trait)]
pub trait ConfigStore {
    /// Copy the value of `(kind, name)` into `out`, returning its length.
    ///
    /// `NotFound` if absent, `ResourceExhausted` if `out` is too small.
    async fn get(&mut self, kind: ConfigKind, name: &str, out: &mut [u8]) -> Result<usize>;

    /// Replace the value of `(kind, name)`.
    async fn set(&mut self, kind: ConfigKind, name: &str, value: &[u8]) -> Result<()>;
}

/// Write the well-known hello entry.
pub async fn bootstrap<S: ConfigStore>(store: &mut S) -> Result<()> {
    store.set(ConfigKind::System, HELLO_KEY, HELLO_VALUE).await?;
    debug!("Bootstrap entry written");
    Ok(())
}

/// RAM-only store with `N` entries of at most `V` bytes each.
pub struct MemoryConfigStore<
    const N: usize = MAX_CONFIG_ENTRIES,
    const V: usize = MAX_CONFIG_VALUE_LEN,
> {
    entries: Vec<(StorageKey, Vec<u8, V>), N>,
}

impl<const N: usize, const V: usize> MemoryConfigStore<N, V> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<const N: usize, const V: usize> Default for MemoryConfigStore<N, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, const V: usize> ConfigStore for MemoryConfigStore<N, V> {
    async fn get(&mut self, kind: ConfigKind, name: &str, out: &mut [u8]) -> Result<usize> {
        let key = storage_key(kind, name)?;
        let (_, value) = self
            .entries
            .iter()
            .find(|(k, _)| *k == key)
            .ok_or(Error::NotFound)?;
        let dst = out.get_mut(..value.len()).ok_or(Error::ResourceExhausted)?;
        dst.copy_from_slice(value);
        Ok(value.len())
    }

    async fn set(&mut self, kind: ConfigKind, name: &str, value: &[u8]) -> Result<()> {
        let key = storage_key(kind, name)?;
        let value = Vec::from_slice(value).map_err(|_| Error::ResourceExhausted)?;

        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
            return Ok(());
        }
        self.entries
            .push((key, value))
            .map_err(|_| Error::ResourceExhausted)
    }
}
