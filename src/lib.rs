pub mod codec;
pub mod net;
pub mod psk;
pub mod types;

pub use codec::{FRAME_SIZE, FrameCodec, FrameError, MAX_PAYLOAD};
pub use net::{Bus, BusConfig, BusError, BusEvent};
pub use psk::{PSK_SIZE, PskError, load_psk};
pub use types::{SenderId, now_ns};
