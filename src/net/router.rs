//! Speaker arbitration and rebroadcast.
//!
//! The router is the single consumer of every link reader's output. One
//! sender at a time (the current speaker) owns the local output; frames
//! from everyone else queue in a per-sender backlog until the speaker sends
//! an empty end-of-turn frame. Because arbitration and the rebroadcast of a
//! frame happen back to back in this one task, the state decision is atomic
//! with the forwarding it caused.

use crate::net::link::LinkSet;
use crate::net::types::{BusEvent, Inbound};
use crate::types::SenderId;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Per-sender queues of deferred payloads, drained in the order the senders
/// first appeared.
#[derive(Debug, Default)]
struct Backlog {
    queues: HashMap<SenderId, VecDeque<Vec<u8>>>,
    order: VecDeque<SenderId>,
}

impl Backlog {
    fn push(&mut self, sender: SenderId, payload: Vec<u8>) {
        if !self.queues.contains_key(&sender) {
            self.order.push_back(sender);
        }
        self.queues.entry(sender).or_default().push_back(payload);
    }

    /// Remove and return the oldest sender's whole queue.
    fn pop_front(&mut self) -> Option<(SenderId, VecDeque<Vec<u8>>)> {
        let sender = self.order.pop_front()?;
        let queue = self.queues.remove(&sender).unwrap_or_default();
        Some((sender, queue))
    }
}

/// Arbitration state machine, pure apart from its own state.
#[derive(Debug, Default)]
pub struct Arbiter {
    current: Option<SenderId>,
    backlog: Backlog,
}

impl Arbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one decrypted frame through arbitration. Returns the payloads to
    /// emit on the local output, in order.
    ///
    /// An empty payload is the end-of-turn signal: the floor passes to the
    /// oldest deferred sender, whose queue is drained in full. If that queue
    /// itself ended with an end-of-turn, the floor is free again.
    pub fn accept(&mut self, sender: SenderId, payload: Vec<u8>) -> Vec<Vec<u8>> {
        let mut out = Vec::new();

        if self.current.is_none() {
            self.current = Some(sender);
        }

        if self.current == Some(sender) {
            if !payload.is_empty() {
                out.push(payload);
            } else if let Some((next, queue)) = self.backlog.pop_front() {
                let mut last_was_empty = false;
                for queued in queue {
                    last_was_empty = queued.is_empty();
                    if !queued.is_empty() {
                        out.push(queued);
                    }
                }
                self.current = if last_was_empty { None } else { Some(next) };
            } else {
                self.current = None;
            }
        } else {
            self.backlog.push(sender, payload);
        }

        out
    }

    pub fn current_speaker(&self) -> Option<SenderId> {
        self.current
    }
}

/// Router task: arbitrate each inbound frame, emit its output, and offer the
/// raw ciphertext to every link other than the one it came from.
pub async fn run(
    mut inbound_rx: mpsc::Receiver<Inbound>,
    links: Arc<LinkSet>,
    events_tx: mpsc::Sender<BusEvent>,
) {
    let mut arbiter = Arbiter::new();
    while let Some(msg) = inbound_rx.recv().await {
        let from_addr = msg.from_addr;
        for payload in arbiter.accept(msg.sender, msg.payload) {
            if events_tx.send(BusEvent::Output(payload)).await.is_err() {
                debug!("Event consumer gone; router stopping");
                return;
            }
        }
        links.broadcast(&msg.raw, Some(from_addr)).await;
    }
}
