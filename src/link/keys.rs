//! Per-pair link key derivation.
//!
//! Both ends compute the key locally from the two hardware addresses and
//! the firmware PSK, so it is never sent over the air:
//!
//! ```text
//! key = HMAC-SHA256(psk, LABEL || min(a, b) || max(a, b))[..16]
//! ```
//!
//! Sorting the addresses makes the result independent of which side is
//! the initiator. Intermediate buffers are wiped before returning.

use crate::link::PeerAddress;
use hmac::digest::Key;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

/// Link key length (ESP-NOW LMK size).
pub const LINK_KEY_LEN: usize = 16;

/// Domain-separation label hashed in front of the addresses.
const LABEL: &[u8] = b"keylink/lmk/v1";

const INPUT_LEN: usize = LABEL.len() + 12;

/// SHA-256 block size. Shorter HMAC keys are zero padded to this length.
const HMAC_BLOCK_LEN: usize = 64;

/// A 16-byte symmetric link key. Wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct LinkKey([u8; LINK_KEY_LEN]);

impl LinkKey {
    pub fn as_bytes(&self) -> &[u8; LINK_KEY_LEN] {
        &self.0
    }
}

impl Drop for LinkKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl core::fmt::Debug for LinkKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("LinkKey(..)")
    }
}

/// Derive the link key shared by `own` and `peer`.
///
/// `derive_link_key(a, b, psk) == derive_link_key(b, a, psk)` for every pair.
pub fn derive_link_key(own: &PeerAddress, peer: &PeerAddress, psk: &[u8; 16]) -> LinkKey {
    let (low, high) = if own.bytes() <= peer.bytes() {
        (own, peer)
    } else {
        (peer, own)
    };

    let mut input = [0u8; INPUT_LEN];
    input[..LABEL.len()].copy_from_slice(LABEL);
    input[LABEL.len()..LABEL.len() + 6].copy_from_slice(low.bytes());
    input[LABEL.len() + 6..].copy_from_slice(high.bytes());

    let mut block = [0u8; HMAC_BLOCK_LEN];
    block[..psk.len()].copy_from_slice(psk);
    let mut mac = <HmacSha256 as KeyInit>::new(Key::<HmacSha256>::from_slice(&block));
    mac.update(&input);
    let mut digest: [u8; 32] = mac.finalize().into_bytes().into();

    let mut key = [0u8; LINK_KEY_LEN];
    key.copy_from_slice(&digest[..LINK_KEY_LEN]);

    block.zeroize();
    input.zeroize();
    digest.zeroize();

    LinkKey(key)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn derivation_ignores_argument_order(
            a in any::<[u8; 6]>(),
            b in any::<[u8; 6]>(),
            psk in any::<[u8; 16]>(),
        ) {
            let a = PeerAddress(a);
            let b = PeerAddress(b);
            prop_assert_eq!(derive_link_key(&a, &b, &psk), derive_link_key(&b, &a, &psk));
        }

        #[test]
        fn padded_psk_matches_variable_length_hmac(
            a in any::<[u8; 6]>(),
            b in any::<[u8; 6]>(),
            psk in any::<[u8; 16]>(),
        ) {
            let (a, b) = (PeerAddress(a), PeerAddress(b));
            let (low, high) = if a.bytes() <= b.bytes() { (a, b) } else { (b, a) };

            let mut mac = <HmacSha256 as Mac>::new_from_slice(&psk).unwrap();
            mac.update(LABEL);
            mac.update(low.bytes());
            mac.update(high.bytes());
            let digest = mac.finalize().into_bytes();

            let key = derive_link_key(&a, &b, &psk);
            prop_assert_eq!(&key.as_bytes()[..], &digest[..16]);
        }
    }
}
