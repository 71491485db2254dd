//! Relay networking layer.

pub mod bus;
pub mod input;
pub mod link;
pub mod router;
pub mod types;

// Re-exports
pub use bus::{Bus, BusError};
pub use input::pump;
pub use link::{Link, LinkId, LinkSet, attach_connection};
pub use router::Arbiter;
pub use types::{
    BusConfig, BusEvent, INPUT_CHUNK_SIZE, Inbound,
};
