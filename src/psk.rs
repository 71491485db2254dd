//! Pre-shared key loading.
//!
//! The key file holds a single hex-encoded 32-byte key (64 hex characters,
//! optionally followed by whitespace). Generate one with the `keygen` tool.

use std::path::Path;
use thiserror::Error;

/// Key size in bytes (ChaCha20-Poly1305, 256-bit key).
pub const PSK_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum PskError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("key must be 32 bytes (64 hex characters), got {0} bytes")]
    BadLength(usize),
}

/// Read and decode the key file.
pub fn load_psk<P: AsRef<Path>>(path: P) -> Result<[u8; PSK_SIZE], PskError> {
    let text = std::fs::read_to_string(path)?;
    let bytes = hex::decode(text.trim())?;
    if bytes.len() != PSK_SIZE {
        return Err(PskError::BadLength(bytes.len()));
    }
    let mut key = [0u8; PSK_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}
