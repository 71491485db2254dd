//! PSK frame codec: fixed-size authenticated records with replay protection.
//!
//! Every wire frame is exactly [`FRAME_SIZE`] bytes: a fresh random nonce
//! followed by the ChaCha20-Poly1305 ciphertext (tag included) of a padded
//! record. The record carries the sender's identity, a wrapping counter and a
//! wall-clock timestamp ahead of the payload, so each frame is independently
//! authenticated and checkable for freshness and ordering without any
//! handshake. Padding keeps every frame the same size on the wire regardless
//! of payload length.
//!
//! The timestamp bound rejects cross-session replays; the per-sender counter
//! rejects in-session reordering. In a mesh where every node rebroadcasts to
//! every other, the strict timestamp monotonicity is also what terminates
//! forwarding loops: a frame coming around a second time is a replay.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::psk::PSK_SIZE;
use crate::types::{SENDER_ID_SIZE, SenderId, now_ns};

/// Size of one wire frame.
pub const FRAME_SIZE: usize = 1400;

/// AEAD nonce size (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Poly1305 tag size.
pub const TAG_SIZE: usize = 16;

/// Record header: sender id + counter (u32 BE) + timestamp (u64 BE, ns).
pub const HEADER_SIZE: usize = SENDER_ID_SIZE + 4 + 8;

/// AEAD plaintext size: every record is padded up to this before sealing.
pub const PADDED_SIZE: usize = FRAME_SIZE - NONCE_SIZE - TAG_SIZE;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD: usize = PADDED_SIZE - 1 - HEADER_SIZE;

/// Accepted distance between a frame's timestamp and the local clock.
pub const MAX_CLOCK_SKEW_NS: u64 = 10_000_000_000;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("payload too large: {0} bytes (max 1347)")]
    TooLarge(usize),

    #[error("frame is {0} bytes, expected 1400")]
    BadLength(usize),

    #[error("authentication failed")]
    AuthFail,

    #[error("timestamp outside freshness window")]
    Expired,

    #[error("replayed or reordered frame")]
    ReplayOrReorder,

    #[error("counter gap: expected {expected}, got {got}")]
    CounterGap { expected: u32, got: u32 },

    #[error("malformed record")]
    Malformed,
}

/// Pad a record up to [`PADDED_SIZE`]: zeros, a 0x01 marker, then the record.
fn pad(record: &[u8]) -> Vec<u8> {
    debug_assert!(record.len() < PADDED_SIZE);
    let mut padded = vec![0u8; PADDED_SIZE];
    let start = PADDED_SIZE - record.len();
    padded[start - 1] = 0x01;
    padded[start..].copy_from_slice(record);
    padded
}

/// Strip padding: everything strictly after the first 0x01 byte.
fn unpad(padded: &[u8]) -> Result<&[u8], FrameError> {
    let marker = padded
        .iter()
        .position(|&b| b == 0x01)
        .ok_or(FrameError::Malformed)?;
    Ok(&padded[marker + 1..])
}

/// Local transmit state. Written only by `encrypt`.
#[derive(Debug, Default)]
struct SelfState {
    last_clk: Option<u64>,
    ctr: u32,
}

/// Per-remote-sender receive state, installed on first successful decrypt.
#[derive(Debug)]
struct PeerState {
    last_clk: u64,
    last_ctr: u32,
}

/// Stateful frame codec shared by every reader and the local input path.
///
/// The self state and the peer registry are deliberately separate: decrypt
/// never touches the self state, and frames claiming our own identity are
/// rejected outright (a loop-back is just a replay of ourselves).
pub struct FrameCodec {
    cipher: ChaCha20Poly1305,
    self_id: SenderId,
    self_state: Mutex<SelfState>,
    peers: Mutex<HashMap<SenderId, PeerState>>,
}

impl FrameCodec {
    pub fn new(psk: [u8; PSK_SIZE]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&psk)),
            self_id: SenderId::generate(),
            self_state: Mutex::new(SelfState::default()),
            peers: Mutex::new(HashMap::new()),
        }
    }

    pub fn sender_id(&self) -> SenderId {
        self.self_id
    }

    /// Seal one payload into a full wire frame.
    ///
    /// The frame timestamp is strictly monotone even when the wall clock
    /// stalls, and the counter advances by one per frame, wrapping at 2^32.
    pub fn encrypt(&self, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::TooLarge(payload.len()));
        }

        let (clk, ctr) = {
            let mut state = self.self_state.lock().unwrap();
            let clk = match state.last_clk {
                Some(last) => now_ns().max(last + 1),
                None => now_ns(),
            };
            state.last_clk = Some(clk);
            let ctr = state.ctr;
            state.ctr = state.ctr.wrapping_add(1);
            (clk, ctr)
        };

        self.seal(payload, clk, ctr)
    }

    fn seal(&self, payload: &[u8], clk: u64, ctr: u32) -> Result<Vec<u8>, FrameError> {
        let mut record = Vec::with_capacity(HEADER_SIZE + payload.len());
        record.extend_from_slice(self.self_id.as_bytes());
        record.extend_from_slice(&ctr.to_be_bytes());
        record.extend_from_slice(&clk.to_be_bytes());
        record.extend_from_slice(payload);

        let padded = pad(&record);
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), padded.as_slice())
            .map_err(|_| FrameError::AuthFail)?;

        let mut frame = Vec::with_capacity(FRAME_SIZE);
        frame.extend_from_slice(&nonce);
        frame.extend_from_slice(&ciphertext);
        debug_assert_eq!(frame.len(), FRAME_SIZE);
        Ok(frame)
    }

    /// Open one wire frame, validate it against the sender's state, and
    /// return the sender identity and payload.
    ///
    /// Failures never advance any state, so a bad frame costs its sender
    /// nothing but the frame itself.
    pub fn decrypt(&self, frame: &[u8]) -> Result<(SenderId, Vec<u8>), FrameError> {
        if frame.len() != FRAME_SIZE {
            return Err(FrameError::BadLength(frame.len()));
        }
        let (nonce, ciphertext) = frame.split_at(NONCE_SIZE);

        let padded = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| FrameError::AuthFail)?;

        let record = unpad(&padded)?;
        if record.len() < HEADER_SIZE {
            return Err(FrameError::Malformed);
        }
        let (header, payload) = record.split_at(HEADER_SIZE);

        let mut id = [0u8; SENDER_ID_SIZE];
        id.copy_from_slice(&header[..SENDER_ID_SIZE]);
        let sender = SenderId::from_bytes(id);
        let ctr = u32::from_be_bytes(header[SENDER_ID_SIZE..SENDER_ID_SIZE + 4].try_into().unwrap());
        let clk = u64::from_be_bytes(header[SENDER_ID_SIZE + 4..HEADER_SIZE].try_into().unwrap());

        // A frame carrying our own id came back around the mesh.
        if sender == self.self_id {
            return Err(FrameError::ReplayOrReorder);
        }

        if now_ns().abs_diff(clk) > MAX_CLOCK_SKEW_NS {
            return Err(FrameError::Expired);
        }

        let mut peers = self.peers.lock().unwrap();
        match peers.get_mut(&sender) {
            Some(state) => {
                if clk <= state.last_clk {
                    return Err(FrameError::ReplayOrReorder);
                }
                let expected = state.last_ctr.wrapping_add(1);
                if ctr != expected {
                    return Err(FrameError::CounterGap { expected, got: ctr });
                }
                state.last_clk = clk;
                state.last_ctr = ctr;
            }
            None => {
                peers.insert(
                    sender,
                    PeerState {
                        last_clk: clk,
                        last_ctr: ctr,
                    },
                );
            }
        }

        Ok((sender, payload.to_vec()))
    }
}
