//! Bus configuration, events and tuning constants.

use crate::codec::MAX_PAYLOAD;
use crate::psk::PSK_SIZE;
use crate::types::SenderId;
use std::net::SocketAddr;

/// Local input chunk size. Kept strictly below the frame payload capacity so
/// a full chunk never collides with the limit.
pub const INPUT_CHUNK_SIZE: usize = MAX_PAYLOAD - 1;

/// Depth of the fan-in queue from link readers to the router.
pub const INBOUND_QUEUE_DEPTH: usize = 64;

/// Depth of each connection's outbound frame queue. A slow peer stalls the
/// router once its queue fills; that is the accepted backpressure scheme.
pub const OUTBOUND_QUEUE_DEPTH: usize = 32;

/// Depth of the event queue toward the local consumer.
pub const EVENT_QUEUE_DEPTH: usize = 256;

/// Bus configuration, assembled by the CLI or by tests.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// 32-byte pre-shared key.
    pub psk: [u8; PSK_SIZE],
    /// Bind and listen here, if set.
    pub server_addr: Option<SocketAddr>,
    /// Dial each of these once at startup.
    pub remote_addrs: Vec<SocketAddr>,
    /// When false, received frames are neither delivered nor rebroadcast;
    /// the bus only transmits from local input.
    pub wait_input: bool,
    /// Chunks ending in this byte are followed by an end-of-turn frame.
    pub sentinel_byte: Option<u8>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            psk: [0u8; PSK_SIZE],
            server_addr: None,
            remote_addrs: Vec::new(),
            wait_input: true,
            sentinel_byte: None,
        }
    }
}

/// Events delivered to the bus consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// Plaintext for local standard output, in arbitration order.
    Output(Vec<u8>),
    PeerConnected(SocketAddr),
    PeerDisconnected(SocketAddr),
}

/// One decrypted frame on its way from a link reader to the router.
#[derive(Debug)]
pub struct Inbound {
    pub sender: SenderId,
    /// Address of the connection the frame arrived on; excluded from the
    /// rebroadcast.
    pub from_addr: SocketAddr,
    pub payload: Vec<u8>,
    /// The ciphertext exactly as received, forwarded verbatim.
    pub raw: Vec<u8>,
}
