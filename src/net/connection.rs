use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tokio::sync::mpsc;

use crate::game::entity::{ConnectionId, EntityId};

/// Item in a connection's outbound queue
#[derive(Debug, Clone)]
pub enum Outbound {
    /// One protocol buffer, shared between recipients of a broadcast
    Frame(Arc<[u8]>),
    /// Close the connection after everything queued before it
    Close,
}

/// Why a send did not go through
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("outbound queue full")]
    Overflow,
    #[error("connection closed")]
    Closed,
}

/// A delayed Ping reply owed to one connection. At most one exists per
/// connection at a time.
#[derive(Debug)]
pub struct PendingPing {
    outbound: mpsc::WeakSender<Outbound>,
    pending: Arc<AtomicBool>,
}

impl PendingPing {
    /// Queue the reply if the connection is still open, then free the slot
    /// for the next Ping. Returns whether the frame was queued.
    pub fn deliver(self, frame: Arc<[u8]>) -> bool {
        let sent = self
            .outbound
            .upgrade()
            .is_some_and(|tx| tx.try_send(Outbound::Frame(frame)).is_ok());
        self.pending.store(false, Ordering::Release);
        sent
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, no spider yet
    Connected,
    /// Owns a live spider
    Playing,
    /// Close requested; no further traffic is accepted
    Closing,
}

/// Client connection information
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    /// The spider this connection controls
    pub entity: Option<EntityId>,
    pub state: ConnectionState,
    pub created_at: Instant,
    pub last_activity: Instant,
    outbound: mpsc::Sender<Outbound>,
    /// Set while a Ping reply is scheduled
    ping_pending: Arc<AtomicBool>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
}

impl Connection {
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<Outbound>, now: Instant) -> Self {
        Self {
            id,
            entity: None,
            state: ConnectionState::Connected,
            created_at: now,
            last_activity: now,
            outbound,
            ping_pending: Arc::new(AtomicBool::new(false)),
            bytes_sent: 0,
            bytes_received: 0,
            packets_sent: 0,
            packets_received: 0,
        }
    }

    /// Link the connection to its spider
    pub fn attach(&mut self, entity: EntityId) {
        self.entity = Some(entity);
        self.state = ConnectionState::Playing;
    }

    /// Forget the spider, e.g. after it was eaten
    pub fn detach(&mut self) -> Option<EntityId> {
        if self.state == ConnectionState::Playing {
            self.state = ConnectionState::Connected;
        }
        self.entity.take()
    }

    /// Queue a frame without waiting
    pub fn send(&mut self, frame: Arc<[u8]>) -> Result<(), SendError> {
        let len = frame.len();
        self.outbound
            .try_send(Outbound::Frame(frame))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SendError::Overflow,
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            })?;
        self.record_sent(len);
        Ok(())
    }

    /// Ask the writer to close once the queue drains. Best effort: a full
    /// queue still closes when the sender is dropped.
    pub fn request_close(&mut self) {
        self.state = ConnectionState::Closing;
        let _ = self.outbound.try_send(Outbound::Close);
    }

    /// Reserve the connection's single Ping reply slot. `None` while an
    /// earlier reply is still scheduled.
    ///
    /// The reply holds only a weak handle to the queue, so it never keeps a
    /// closed connection alive.
    pub fn claim_ping_reply(&self) -> Option<PendingPing> {
        self.ping_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(PendingPing {
            outbound: self.outbound.downgrade(),
            pending: Arc::clone(&self.ping_pending),
        })
    }

    /// Update last activity timestamp
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Record bytes sent
    pub fn record_sent(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.packets_sent += 1;
    }

    /// Record bytes received
    pub fn record_received(&mut self, bytes: usize, now: Instant) {
        self.bytes_received += bytes as u64;
        self.packets_received += 1;
        self.touch(now);
    }

    /// Get time since last activity
    pub fn idle_time(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn is_playing(&self) -> bool {
        self.entity.is_some() && self.state == ConnectionState::Playing
    }
}

/// Connection manager
pub struct ConnectionManager {
    connections: FxHashMap<ConnectionId, Connection>,
    next_id: ConnectionId,
    queue_capacity: usize,
}

impl ConnectionManager {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: FxHashMap::default(),
            next_id: 1,
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a connection and hand back the receiving end of its queue
    pub fn create(&mut self, now: Instant) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.connections.insert(id, Connection::new(id, tx, now));
        (id, rx)
    }

    /// Get a connection by ID
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Get a mutable connection by ID
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    /// Remove a connection; dropping it closes its queue
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    /// Get connection count
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Get all connection IDs
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    /// Connections with no inbound traffic for longer than `timeout`
    pub fn idle_ids(&self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.idle_time(now) > timeout)
            .map(|c| c.id)
            .collect()
    }

    /// Connections that currently own a spider
    pub fn playing_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut().filter(|c| c.is_playing())
    }

    /// Find the connection controlling a spider
    pub fn find_by_entity(&self, entity: EntityId) -> Option<ConnectionId> {
        self.connections
            .values()
            .find(|c| c.entity == Some(entity))
            .map(|c| c.id)
    }
}
