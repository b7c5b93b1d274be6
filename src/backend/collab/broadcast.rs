/**
 * Connection Fan-out
 *
 * Each live client connection is represented by the sending half of a
 * bounded channel; the WebSocket writer task owns the receiving half. The
 * set is owned by exactly one document actor, so fan-out needs no locking
 * and every client observes deltas in the order the actor produced them.
 *
 * # Failure handling
 *
 * A send fails once the client's writer task has gone away, or when the
 * client has fallen [`OUTBOUND_CAPACITY`] frames behind. Either way the
 * connection is dropped from the set during the same broadcast; dropping
 * the sender lets the writer drain what it has and close the socket, and
 * the client resyncs from a fresh snapshot when it reconnects.
 */

use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Frames a client may lag behind before it is disconnected
pub const OUTBOUND_CAPACITY: usize = 1000;

/// Identifier of one client connection within a document
pub type ConnectionId = u64;

/// Outbound frame channel of one client
pub type Outbound = mpsc::Sender<Bytes>;

/// A fresh outbound channel with the standard capacity
pub fn outbound_channel() -> (Outbound, mpsc::Receiver<Bytes>) {
    mpsc::channel(OUTBOUND_CAPACITY)
}

#[derive(Debug, Default)]
pub struct ConnectionSet {
    next_id: ConnectionId,
    senders: HashMap<ConnectionId, Outbound>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return its id
    pub fn add(&mut self, outbound: Outbound) -> ConnectionId {
        self.next_id += 1;
        let id = self.next_id;
        self.senders.insert(id, outbound);
        id
    }

    pub fn remove(&mut self, id: ConnectionId) -> bool {
        self.senders.remove(&id).is_some()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.senders.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Send `frame` to every connection except `exclude`.
    ///
    /// Returns the number of connections that accepted the frame.
    pub fn broadcast(&mut self, frame: &Bytes, exclude: Option<ConnectionId>) -> usize {
        let mut delivered = 0;
        let mut gone = Vec::new();

        for (id, sender) in &self.senders {
            if Some(*id) == exclude {
                continue;
            }
            match sender.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        "[Broadcast] Connection {} is {} frames behind, dropping it",
                        id,
                        OUTBOUND_CAPACITY
                    );
                    gone.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!("[Broadcast] Dropping closed connection {}", id);
                    gone.push(*id);
                }
            }
        }

        for id in gone {
            self.senders.remove(&id);
        }

        delivered
    }
}
