//! Bus lifecycle: endpoint setup, task wiring and the transmit surface.

use crate::codec::{FrameCodec, FrameError};
use crate::net::link::{Link, LinkSet, attach_connection};
use crate::net::router;
use crate::net::types::{
    BusConfig, BusEvent, EVENT_QUEUE_DEPTH, INBOUND_QUEUE_DEPTH, Inbound,
};
use crate::types::SenderId;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Frame(#[from] FrameError),
}

/// A running bus instance.
///
/// `start` brings up every configured endpoint and returns alongside the
/// event stream carrying arbitrated output and peer churn. Dropping the bus
/// does not tear the tasks down; they end with the process or with their
/// connections.
pub struct Bus {
    codec: Arc<FrameCodec>,
    links: Arc<LinkSet>,
    local_addr: Option<SocketAddr>,
    sentinel_byte: Option<u8>,
}

impl Bus {
    pub async fn start(config: BusConfig) -> Result<(Self, mpsc::Receiver<BusEvent>), BusError> {
        if config.server_addr.is_none() && config.remote_addrs.is_empty() {
            return Err(BusError::Config(
                "no endpoints configured; set a server address or at least one remote".into(),
            ));
        }

        let codec = Arc::new(FrameCodec::new(config.psk));
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        // Without the router, readers drain and drop decrypted frames.
        let inbound_tx = config.wait_input.then_some(inbound_tx);

        let mut links = LinkSet::new();

        let mut listening = None;
        let mut local_addr = None;
        if let Some(addr) = config.server_addr {
            let listener = TcpListener::bind(addr).await?;
            local_addr = Some(listener.local_addr()?);
            listening = Some((listener, links.add_link()));
        }

        let mut dialed = Vec::new();
        for addr in &config.remote_addrs {
            let stream = TcpStream::connect(*addr).await?;
            dialed.push((stream, links.add_link()));
        }

        let links = Arc::new(links);

        if let Some((listener, link)) = listening {
            tokio::spawn(accept_loop(
                listener,
                link,
                codec.clone(),
                inbound_tx.clone(),
                events_tx.clone(),
            ));
        }
        for (stream, link) in dialed {
            attach_connection(
                link,
                stream,
                codec.clone(),
                inbound_tx.clone(),
                events_tx.clone(),
            )
            .await?;
        }

        if config.wait_input {
            tokio::spawn(router::run(inbound_rx, links.clone(), events_tx));
        }

        Ok((
            Self {
                codec,
                links,
                local_addr,
                sentinel_byte: config.sentinel_byte,
            },
            events_rx,
        ))
    }

    /// Encrypt one chunk of local input and offer it to every link.
    pub async fn broadcast_chunk(&self, chunk: &[u8]) -> Result<(), FrameError> {
        let frame = self.codec.encrypt(chunk)?;
        self.links.broadcast(&frame, None).await;
        Ok(())
    }

    /// Send the empty end-of-turn frame, releasing the floor downstream.
    pub async fn end_turn(&self) -> Result<(), FrameError> {
        self.broadcast_chunk(&[]).await
    }

    pub fn sender_id(&self) -> SenderId {
        self.codec.sender_id()
    }

    /// Bound address of the listening endpoint, if one was configured.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn sentinel_byte(&self) -> Option<u8> {
        self.sentinel_byte
    }

    pub async fn connection_count(&self) -> usize {
        self.links.connection_count().await
    }
}

/// Accept connections for the lifetime of the process.
async fn accept_loop(
    listener: TcpListener,
    link: Arc<Link>,
    codec: Arc<FrameCodec>,
    inbound_tx: Option<mpsc::Sender<Inbound>>,
    events_tx: mpsc::Sender<BusEvent>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("Accepted connection from {}", addr);
                if let Err(e) = attach_connection(
                    link.clone(),
                    stream,
                    codec.clone(),
                    inbound_tx.clone(),
                    events_tx.clone(),
                )
                .await
                {
                    warn!("Failed to attach {}: {}", addr, e);
                }
            }
            Err(e) => {
                warn!("Accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }
}
