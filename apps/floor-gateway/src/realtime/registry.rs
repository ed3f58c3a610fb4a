//! Registry of live client connections.
//!
//! Uses `DashMap` for shard-level concurrency and a `parking_lot::Mutex` per
//! entry for the mutable counters. Frames are queued with `try_send`: a
//! connection whose buffer is full loses the frame instead of holding up the
//! caller.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use floor_common::id::{prefix, prefixed_ulid};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;

use crate::error::{RealtimeError, RealtimeResult};

use super::index::SubscriptionIndex;

pub type ConnectionId = String;

/// Serialized JSON text queued for a socket.
pub type OutboundFrame = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Active,
    Degraded,
    Closing,
}

/// Sending half of a connection's outbound frame channel.
///
/// The socket task owns the receiver; dropping every handle ends the task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::Sender<OutboundFrame>,
}

impl ConnectionHandle {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrafficCounters {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub errors: u64,
}

struct ConnectionState {
    counters: TrafficCounters,
    last_activity_at: Instant,
    health_score: f64,
    status: ConnectionStatus,
}

struct ConnectionEntry {
    user_id: String,
    handle: ConnectionHandle,
    connected_at: Instant,
    state: Mutex<ConnectionState>,
}

/// Point-in-time copy of a connection record.
#[derive(Debug, Clone)]
pub struct Connection {
    pub connection_id: ConnectionId,
    pub user_id: String,
    pub subscribed_topics: HashSet<String>,
    pub counters: TrafficCounters,
    pub connected_at: Instant,
    pub last_activity_at: Instant,
    pub health_score: f64,
    pub status: ConnectionStatus,
}

impl Connection {
    pub fn uptime(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.connected_at)
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity_at)
    }
}

/// Shared registry of live connections.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    index: Arc<SubscriptionIndex>,
    live: AtomicUsize,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(index: Arc<SubscriptionIndex>, max_connections: usize) -> Self {
        Self {
            connections: DashMap::new(),
            index,
            live: AtomicUsize::new(0),
            max_connections,
        }
    }

    pub fn index(&self) -> &Arc<SubscriptionIndex> {
        &self.index
    }

    /// Create an `active` record for an authenticated socket.
    pub fn register(&self, handle: ConnectionHandle, user_id: &str) -> RealtimeResult<ConnectionId> {
        let max = self.max_connections;
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .map_err(|_| RealtimeError::CapacityExceeded { max })?;

        let connection_id = prefixed_ulid(prefix::CONNECTION);
        let now = Instant::now();

        self.index.track(&connection_id);
        self.connections.insert(
            connection_id.clone(),
            ConnectionEntry {
                user_id: user_id.to_string(),
                handle,
                connected_at: now,
                state: Mutex::new(ConnectionState {
                    counters: TrafficCounters::default(),
                    last_activity_at: now,
                    health_score: 1.0,
                    status: ConnectionStatus::Active,
                }),
            },
        );

        tracing::info!(%connection_id, %user_id, "connection registered");
        Ok(connection_id)
    }

    /// Mark the connection `closing`, purge it from every index bucket, then
    /// drop the record (which closes its outbound channel). Unregistering an
    /// unknown id is a no-op; returns whether a record was removed.
    pub fn unregister(&self, connection_id: &str) -> bool {
        if let Some(entry) = self.connections.get(connection_id) {
            entry.state.lock().status = ConnectionStatus::Closing;
        }

        let topics = self.index.purge(connection_id);

        match self.connections.remove(connection_id) {
            Some((_, entry)) => {
                self.live.fetch_sub(1, Ordering::AcqRel);
                tracing::info!(
                    %connection_id,
                    user_id = %entry.user_id,
                    topics = topics.len(),
                    "connection unregistered"
                );
                true
            }
            None => false,
        }
    }

    /// Update traffic counters and `last_activity_at`. A missing connection
    /// (disconnect race) is logged and ignored.
    pub fn record_activity(&self, connection_id: &str, bytes_in: u64, bytes_out: u64, error: bool) -> bool {
        let Some(entry) = self.connections.get(connection_id) else {
            tracing::debug!(%connection_id, "activity for unknown connection ignored");
            return false;
        };

        let mut state = entry.state.lock();
        state.counters.bytes_received += bytes_in;
        if bytes_out > 0 {
            state.counters.bytes_sent += bytes_out;
            state.counters.messages_sent += 1;
        }
        if error {
            state.counters.errors += 1;
        }
        state.last_activity_at = Instant::now();
        true
    }

    pub fn lookup(&self, connection_id: &str) -> RealtimeResult<Connection> {
        let entry = self
            .connections
            .get(connection_id)
            .ok_or_else(|| RealtimeError::NotFound(connection_id.to_string()))?;
        let snapshot = self.snapshot_entry(connection_id, &entry);
        Ok(snapshot)
    }

    /// Copies of every connection that is not closing.
    pub fn snapshots(&self) -> Vec<Connection> {
        self.connections
            .iter()
            .map(|entry| self.snapshot_entry(entry.key(), entry.value()))
            .filter(|c| c.status != ConnectionStatus::Closing)
            .collect()
    }

    /// Ids of every connection that is not closing.
    pub fn connection_ids(&self) -> HashSet<ConnectionId> {
        self.connections
            .iter()
            .filter(|entry| entry.state.lock().status != ConnectionStatus::Closing)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn user_connection_count(&self, user_id: &str) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .count()
    }

    /// Store the latest health score; `degraded` flips the status between
    /// active and degraded. Closing connections are left alone.
    pub fn set_health(&self, connection_id: &str, score: f64, degraded: bool) {
        if let Some(entry) = self.connections.get(connection_id) {
            let mut state = entry.state.lock();
            if state.status == ConnectionStatus::Closing {
                return;
            }
            state.health_score = score;
            state.status = if degraded {
                ConnectionStatus::Degraded
            } else {
                ConnectionStatus::Active
            };
        }
    }

    /// Queue `frame` on the connection's outbound channel without waiting.
    ///
    /// Fails with `NotFound` if the connection is gone and `Delivery` if the
    /// channel is closed or its buffer is full.
    pub fn send(&self, connection_id: &str, frame: OutboundFrame) -> RealtimeResult<()> {
        let handle = self
            .connections
            .get(connection_id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| RealtimeError::NotFound(connection_id.to_string()))?;

        let len = frame.len() as u64;
        let result = match handle.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RealtimeError::delivery(connection_id, "outbound buffer full")),
            Err(TrySendError::Closed(_)) => Err(RealtimeError::delivery(connection_id, "connection closed")),
        };

        match &result {
            Ok(()) => self.record_activity(connection_id, 0, len, false),
            Err(_) => self.record_activity(connection_id, 0, 0, true),
        };
        result
    }

    fn snapshot_entry(&self, connection_id: &str, entry: &ConnectionEntry) -> Connection {
        let state = entry.state.lock();
        Connection {
            connection_id: connection_id.to_string(),
            user_id: entry.user_id.clone(),
            subscribed_topics: self.index.topics_of(connection_id).unwrap_or_default(),
            counters: state.counters,
            connected_at: entry.connected_at,
            last_activity_at: state.last_activity_at,
            health_score: state.health_score,
            status: state.status,
        }
    }
}
