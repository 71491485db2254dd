//! Secure multi-party bus.
//!
//! Splices processes on different hosts into one logical duplex channel:
//! stdin is chunked, encrypted under a shared pre-shared key and broadcast to
//! every peer; frames received from peers are relayed to all others and their
//! payloads delivered to stdout one speaker at a time.

use clap::Parser;
use secbus::net::{Bus, BusConfig, BusEvent, pump};
use secbus::psk;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "secbus", version, about = "Secure multi-party bus: encrypted stdin/stdout relay")]
struct Args {
    /// Path to the hex-encoded 32-byte pre-shared key
    #[arg(long)]
    psk_file: PathBuf,

    /// Bind and listen on this address
    #[arg(long)]
    server_addr: Option<SocketAddr>,

    /// Dial this peer (repeatable)
    #[arg(long = "remote-server-addr")]
    remote_server_addr: Vec<SocketAddr>,

    /// Relay received frames and deliver them to stdout (default)
    #[arg(long, overrides_with = "no_wait_input")]
    wait_input: bool,

    /// Transmit from local stdin only; do not start the router
    #[arg(long)]
    no_wait_input: bool,

    /// Send an end-of-turn frame whenever a chunk ends with this byte
    #[arg(long)]
    sentinel_byte: Option<u8>,
}

#[tokio::main]
async fn main() {
    // Stdout carries payload bytes; all logging goes to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("secbus=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let psk = match psk::load_psk(&args.psk_file) {
        Ok(key) => key,
        Err(e) => {
            error!("Failed to load PSK from {}: {}", args.psk_file.display(), e);
            std::process::exit(1);
        }
    };

    let config = BusConfig {
        psk,
        server_addr: args.server_addr,
        remote_addrs: args.remote_server_addr,
        wait_input: args.wait_input || !args.no_wait_input,
        sentinel_byte: args.sentinel_byte,
    };

    let (bus, mut events) = match Bus::start(config).await {
        Ok(started) => started,
        Err(e) => {
            error!("Failed to start bus: {}", e);
            std::process::exit(1);
        }
    };

    info!("Bus running; sender id {}", bus.sender_id());
    if let Some(addr) = bus.local_addr() {
        info!("Listening on {}", addr);
    }

    // Deliver arbitrated output to stdout; log peer churn.
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = events.recv().await {
            match event {
                BusEvent::Output(payload) => {
                    if stdout.write_all(&payload).await.is_err() {
                        return;
                    }
                    if stdout.flush().await.is_err() {
                        return;
                    }
                }
                BusEvent::PeerConnected(addr) => info!("Peer connected: {}", addr),
                BusEvent::PeerDisconnected(addr) => info!("Peer disconnected: {}", addr),
            }
        }
    });

    if let Err(e) = pump(tokio::io::stdin(), &bus).await {
        error!("Input loop failed: {}", e);
        std::process::exit(1);
    }

    // Let the per-connection writers flush the final end-of-turn frame
    // before the runtime drops them.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    info!("Local input closed; shutting down");
}
