//! Overlay keys and content addressing.
//!
//! A store request enters the overlay under a key derived from the stored
//! object's name: SHA-1 over the UTF-8 bytes of the name, truncated to the
//! first 128 bits. The key only ever routes store operations; it is never
//! used as a transport address.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Width of an overlay key in bytes (128 bits).
pub const KEY_LEN: usize = 16;

/// Fixed-width overlay routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OverlayKey([u8; KEY_LEN]);

impl OverlayKey {
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// XOR distance to another key, compared lexicographically.
    pub fn distance(&self, other: &OverlayKey) -> [u8; KEY_LEN] {
        let mut out = [0u8; KEY_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        out
    }
}

impl fmt::Display for OverlayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Derive the overlay key for an object name.
///
/// Deterministic and side-effect free. Empty names hash like any other
/// input; callers that need non-empty names validate beforehand.
pub fn derive_key(name: &str) -> OverlayKey {
    let digest = Sha1::digest(name.as_bytes());
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&digest[..KEY_LEN]);
    OverlayKey(key)
}
