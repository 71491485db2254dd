//! Local input pump: chunk, encrypt, fan out.

use crate::net::bus::{Bus, BusError};
use crate::net::types::INPUT_CHUNK_SIZE;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Read local input until EOF, encrypting each chunk and offering it to every
/// link.
///
/// With a sentinel byte configured, a chunk ending in that byte is followed
/// by an end-of-turn frame, so line-buffered producers can yield the floor
/// without closing their input. EOF itself always sends a final end-of-turn
/// frame before returning, releasing any downstream arbiter still holding
/// this sender's id.
pub async fn pump<R: AsyncRead + Unpin>(mut input: R, bus: &Bus) -> Result<(), BusError> {
    let mut buf = vec![0u8; INPUT_CHUNK_SIZE];
    loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            debug!("Local input reached EOF");
            bus.end_turn().await?;
            return Ok(());
        }

        bus.broadcast_chunk(&buf[..n]).await?;

        if bus.sentinel_byte() == Some(buf[n - 1]) {
            bus.end_turn().await?;
        }
    }
}
