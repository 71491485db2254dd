//! Link set: the endpoints that carry fixed-size frames.
//!
//! A listening link owns every connection it has accepted; a dialing link
//! owns at most one. Both expose the same contract: each connection has a
//! reader that assembles exactly one wire frame at a time, and an outbound
//! queue drained by a dedicated writer task, so concurrent senders can never
//! interleave bytes of two frames on one connection.

use crate::codec::{FRAME_SIZE, FrameCodec, FrameError};
use crate::net::types::{BusEvent, Inbound, OUTBOUND_QUEUE_DEPTH};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

pub type LinkId = usize;

/// One configured endpoint and its live connections.
pub struct Link {
    pub id: LinkId,
    conns: Mutex<HashMap<SocketAddr, mpsc::Sender<Vec<u8>>>>,
}

impl Link {
    fn new(id: LinkId) -> Self {
        Self {
            id,
            conns: Mutex::new(HashMap::new()),
        }
    }

    /// Queue a frame to every live connection except `exclude`. Connections
    /// whose writer has gone away are dropped from the set; the rest are
    /// unaffected.
    pub async fn send(&self, frame: &[u8], exclude: Option<SocketAddr>) {
        let mut conns = self.conns.lock().await;
        let mut dead = Vec::new();
        for (addr, tx) in conns.iter() {
            if Some(*addr) == exclude {
                continue;
            }
            if tx.send(frame.to_vec()).await.is_err() {
                dead.push(*addr);
            }
        }
        for addr in dead {
            conns.remove(&addr);
            debug!("Dropped dead connection {}", addr);
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.conns.lock().await.len()
    }
}

/// Every configured link, in creation order.
#[derive(Default)]
pub struct LinkSet {
    links: Vec<Arc<Link>>,
}

impl LinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_link(&mut self) -> Arc<Link> {
        let link = Arc::new(Link::new(self.links.len()));
        self.links.push(link.clone());
        link
    }

    /// Offer a raw frame to every connection on every link, minus the one it
    /// arrived on.
    pub async fn broadcast(&self, frame: &[u8], exclude: Option<SocketAddr>) {
        for link in &self.links {
            link.send(frame, exclude).await;
        }
    }

    pub async fn connection_count(&self) -> usize {
        let mut total = 0;
        for link in &self.links {
            total += link.connection_count().await;
        }
        total
    }
}

/// Register a connection on its link and spawn its reader and writer tasks.
///
/// Without a router (`inbound_tx` absent), the reader still runs so the
/// socket keeps draining; decrypted frames are simply dropped.
pub async fn attach_connection(
    link: Arc<Link>,
    stream: TcpStream,
    codec: Arc<FrameCodec>,
    inbound_tx: Option<mpsc::Sender<Inbound>>,
    events_tx: mpsc::Sender<BusEvent>,
) -> std::io::Result<SocketAddr> {
    let addr = stream.peer_addr()?;
    let (read_half, write_half) = stream.into_split();

    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
    link.conns.lock().await.insert(addr, tx);

    tokio::spawn(write_loop(write_half, rx, addr));
    tokio::spawn(read_loop(
        link.clone(),
        read_half,
        addr,
        codec,
        inbound_tx,
        events_tx.clone(),
    ));

    let _ = events_tx.send(BusEvent::PeerConnected(addr)).await;
    Ok(addr)
}

/// Drain the outbound queue, one whole frame per write.
async fn write_loop(mut half: OwnedWriteHalf, mut rx: mpsc::Receiver<Vec<u8>>, addr: SocketAddr) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = half.write_all(&frame).await {
            debug!("Write to {} failed: {}", addr, e);
            break;
        }
    }
}

/// Assemble full frames and hand the decrypted results to the router, or
/// drop them when no router is running.
///
/// Per-frame codec failures are dropped without disturbing the connection; a
/// short read (EOF mid-frame included) ends it.
async fn read_loop(
    link: Arc<Link>,
    mut half: OwnedReadHalf,
    addr: SocketAddr,
    codec: Arc<FrameCodec>,
    inbound_tx: Option<mpsc::Sender<Inbound>>,
    events_tx: mpsc::Sender<BusEvent>,
) {
    let mut frame = vec![0u8; FRAME_SIZE];
    loop {
        if let Err(e) = half.read_exact(&mut frame).await {
            debug!("Connection {} closed: {}", addr, e);
            break;
        }
        match codec.decrypt(&frame) {
            Ok((sender, payload)) => {
                let Some(inbound_tx) = &inbound_tx else {
                    continue;
                };
                let msg = Inbound {
                    sender,
                    from_addr: addr,
                    payload,
                    raw: frame.clone(),
                };
                if inbound_tx.send(msg).await.is_err() {
                    break;
                }
            }
            Err(e @ FrameError::CounterGap { .. }) => {
                warn!("Frame from {} dropped: {}", addr, e);
            }
            Err(e) => {
                debug!("Frame from {} dropped: {}", addr, e);
            }
        }
    }
    link.conns.lock().await.remove(&addr);
    let _ = events_tx.send(BusEvent::PeerDisconnected(addr)).await;
}
