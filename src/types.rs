//! Core identifiers and time helpers.

use rand::RngCore;
use rand::rngs::OsRng;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Size of a sender identity in bytes.
pub const SENDER_ID_SIZE: usize = 12;

/// Opaque identity of one bus instance, drawn at process start and kept for
/// the life of the process. Peers key their replay-protection state on it and
/// the router uses it as the arbitration token.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderId([u8; SENDER_ID_SIZE]);

impl SenderId {
    /// Draw a fresh random identity.
    pub fn generate() -> Self {
        let mut id = [0u8; SENDER_ID_SIZE];
        OsRng.fill_bytes(&mut id);
        Self(id)
    }

    pub const fn from_bytes(bytes: [u8; SENDER_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; SENDER_ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SenderId({})", hex::encode(self.0))
    }
}

/// Wall clock in nanoseconds since the UNIX epoch.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_ids_unique() {
        let a = SenderId::generate();
        let b = SenderId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn sender_id_display_is_hex() {
        let id = SenderId::from_bytes([0xab; SENDER_ID_SIZE]);
        assert_eq!(id.to_string(), "ab".repeat(SENDER_ID_SIZE));
    }

    #[test]
    fn clock_advances() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
        assert!(a > 0);
    }
}
