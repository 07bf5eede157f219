/// Room notification hub
///
/// Tracks which live connections are members of which rooms and fans
/// configuration updates out to the current members of a room.
///
/// A room is keyed by the owning user's id. Rooms are created on first join
/// and removed as soon as their last member leaves or disconnects.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::metrics;

pub mod events;
pub mod sender;

pub use events::{ClientEvent, HubEvent, UpdateEvent, UpdateSource};
pub use sender::{DeliveryError, RoomSender};

/// Longest accepted room identifier, in bytes
pub const MAX_ROOM_ID_LEN: usize = 256;

/// Payload fields checked, in order, for the room owner
const OWNER_FIELDS: [&str; 2] = ["owner_id", "owner"];

/// Unique identifier for one live transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Validated room identifier (the owning user's id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, HubError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(HubError::InvalidRoom("room id is empty".to_string()));
        }
        if raw.len() > MAX_ROOM_ID_LEN {
            return Err(HubError::InvalidRoom(format!(
                "room id exceeds {} bytes",
                MAX_ROOM_ID_LEN
            )));
        }
        if raw.chars().any(char::is_control) {
            return Err(HubError::InvalidRoom(
                "room id contains control characters".to_string(),
            ));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = HubError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RoomId> for String {
    fn from(room: RoomId) -> Self {
        room.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hub-level rejections
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("invalid room id: {0}")]
    InvalidRoom(String),

    #[error("connection not found: {0}")]
    UnknownConnection(ConnectionId),

    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
}

impl HubError {
    /// Stable code sent to clients in `ERROR` frames
    pub fn code(&self) -> &'static str {
        match self {
            HubError::InvalidRoom(_) => "INVALID_ROOM",
            HubError::UnknownConnection(_) => "UNKNOWN_CONNECTION",
            HubError::Delivery(_) => "DELIVERY_FAILED",
        }
    }
}

/// Result of an accepted join request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub room_id: RoomId,
    /// False when the connection was already a member
    pub newly_joined: bool,
    pub member_count: usize,
}

/// Result of a broadcast. Never an error: the triggering mutation must
/// succeed whether or not anyone is listening.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotifyOutcome {
    /// False when the room id or payload was rejected
    pub accepted: bool,
    pub delivered: usize,
    pub failed: usize,
    /// Members dropped because their transport was closed
    pub pruned: usize,
}

impl NotifyOutcome {
    fn rejected() -> Self {
        Self::default()
    }

    fn empty() -> Self {
        Self {
            accepted: true,
            ..Self::default()
        }
    }

    /// Metrics label for this outcome
    pub fn label(&self) -> &'static str {
        match (self.accepted, self.delivered, self.failed) {
            (false, _, _) => "rejected",
            (true, 0, 0) => "empty",
            (true, 0, _) => "failed",
            (true, _, _) => "delivered",
        }
    }
}

/// Aggregate counts for introspection endpoints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub rooms: usize,
    pub memberships: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub connection_id: ConnectionId,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub member_count: usize,
    pub connections: Vec<ConnectionSummary>,
}

struct Connection {
    sender: Box<dyn RoomSender>,
    rooms: HashSet<RoomId>,
    connected_at: DateTime<Utc>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, Connection>,
    // room -> member connections
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

impl HubState {
    /// Drops a connection and every membership it holds
    fn remove_connection(&mut self, conn_id: ConnectionId) -> Option<Connection> {
        let conn = self.connections.remove(&conn_id)?;

        for room in &conn.rooms {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(&conn_id);
                if members.is_empty() {
                    self.rooms.remove(room);
                    tracing::debug!(room_id = %room, "removed empty room");
                }
            }
        }

        Some(conn)
    }

    fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.len(),
            rooms: self.rooms.len(),
            memberships: self.rooms.values().map(HashSet::len).sum(),
        }
    }
}

/// Room membership registry and broadcaster.
///
/// Cheap to clone; all clones share one membership map. Every operation
/// takes the same lock, so deliveries to a room leave the hub in the order
/// `notify` was called.
#[derive(Clone, Default)]
pub struct RoomHub {
    inner: Arc<Mutex<HubState>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live connection. It starts in no rooms.
    pub fn connect(&self, sender: impl RoomSender + 'static) -> ConnectionId {
        let conn_id = ConnectionId::new();
        let mut state = self.inner.lock();

        state.connections.insert(
            conn_id,
            Connection {
                sender: Box::new(sender),
                rooms: HashSet::new(),
                connected_at: Utc::now(),
            },
        );
        metrics::set_active_connections(state.connections.len());

        tracing::debug!(
            connection_id = %conn_id,
            total_connections = state.connections.len(),
            "connection registered"
        );

        conn_id
    }

    /// Add a connection to a room and acknowledge with `ROOM_JOINED`.
    ///
    /// Joining a room twice keeps a single membership; each request is
    /// acknowledged.
    pub fn join(&self, conn_id: ConnectionId, room_id: &str) -> Result<JoinOutcome, HubError> {
        let room = RoomId::parse(room_id)?;
        let mut state = self.inner.lock();

        let conn = state
            .connections
            .get_mut(&conn_id)
            .ok_or(HubError::UnknownConnection(conn_id))?;
        let newly_joined = conn.rooms.insert(room.clone());

        if let Err(err) = conn.sender.deliver(&HubEvent::RoomJoined(room.clone())) {
            // Roll back only a membership this request created
            if newly_joined {
                conn.rooms.remove(&room);
            }
            if err == DeliveryError::Closed {
                state.remove_connection(conn_id);
                metrics::set_active_connections(state.connections.len());
            }
            tracing::warn!(
                connection_id = %conn_id,
                room_id = %room,
                error = %err,
                "failed to acknowledge join"
            );
            return Err(err.into());
        }

        let members = state.rooms.entry(room.clone()).or_default();
        members.insert(conn_id);
        let member_count = members.len();

        metrics::record_join(newly_joined);
        tracing::info!(
            connection_id = %conn_id,
            room_id = %room,
            newly_joined,
            member_count,
            "joined room"
        );

        Ok(JoinOutcome {
            room_id: room,
            newly_joined,
            member_count,
        })
    }

    /// Remove a connection from one room. Returns whether it was a member.
    pub fn leave_room(&self, conn_id: ConnectionId, room_id: &str) -> Result<bool, HubError> {
        let room = RoomId::parse(room_id)?;
        let mut state = self.inner.lock();

        let conn = state
            .connections
            .get_mut(&conn_id)
            .ok_or(HubError::UnknownConnection(conn_id))?;
        if !conn.rooms.remove(&room) {
            return Ok(false);
        }
        // Membership is gone whether or not the ack lands
        let ack = conn.sender.deliver(&HubEvent::RoomLeft(room.clone()));

        if let Some(members) = state.rooms.get_mut(&room) {
            members.remove(&conn_id);
            if members.is_empty() {
                state.rooms.remove(&room);
            }
        }

        match ack {
            Ok(()) => {}
            Err(DeliveryError::Closed) => {
                state.remove_connection(conn_id);
                metrics::set_active_connections(state.connections.len());
                tracing::debug!(connection_id = %conn_id, "pruned closed connection on leave");
            }
            Err(err) => {
                tracing::warn!(
                    connection_id = %conn_id,
                    room_id = %room,
                    error = %err,
                    "failed to acknowledge leave"
                );
            }
        }

        tracing::info!(connection_id = %conn_id, room_id = %room, "left room");
        Ok(true)
    }

    /// Disconnect handling: drop the connection from every room.
    ///
    /// Idempotent; unknown or never-joined connections are a no-op.
    pub fn leave(&self, conn_id: ConnectionId) {
        let mut state = self.inner.lock();

        if let Some(conn) = state.remove_connection(conn_id) {
            metrics::set_active_connections(state.connections.len());
            tracing::debug!(
                connection_id = %conn_id,
                rooms = conn.rooms.len(),
                total_connections = state.connections.len(),
                "connection removed"
            );
        }
    }

    /// Push `UPDATED_CONFIG(payload)` to every current member of a room.
    ///
    /// The payload must be a JSON object whose `owner_id` (or `owner`)
    /// equals the room id; otherwise nothing is delivered.
    pub fn notify(&self, room_id: &str, payload: Value) -> NotifyOutcome {
        let room = match RoomId::parse(room_id) {
            Ok(room) => room,
            Err(err) => {
                tracing::warn!(room_id, error = %err, "dropping update for invalid room");
                metrics::record_notification("rejected");
                return NotifyOutcome::rejected();
            }
        };

        if let Err(reason) = check_owner(&room, &payload) {
            tracing::warn!(room_id = %room, reason, "dropping malformed update payload");
            metrics::record_notification("rejected");
            return NotifyOutcome::rejected();
        }

        let event = HubEvent::UpdatedConfig(payload);
        let mut state = self.inner.lock();

        let Some(members) = state.rooms.get(&room) else {
            tracing::debug!(room_id = %room, "no subscribers for update");
            metrics::record_notification("empty");
            return NotifyOutcome::empty();
        };

        let mut outcome = NotifyOutcome::empty();
        let mut closed = Vec::new();

        for conn_id in members {
            let Some(conn) = state.connections.get(conn_id) else {
                continue;
            };
            match conn.sender.deliver(&event) {
                Ok(()) => outcome.delivered += 1,
                Err(err) => {
                    outcome.failed += 1;
                    metrics::record_delivery_failure(err.as_label());
                    if err == DeliveryError::Closed {
                        closed.push(*conn_id);
                    }
                }
            }
        }

        for conn_id in closed {
            if state.remove_connection(conn_id).is_some() {
                outcome.pruned += 1;
            }
        }
        if outcome.pruned > 0 {
            metrics::set_active_connections(state.connections.len());
        }

        metrics::record_notification(outcome.label());
        metrics::record_deliveries(outcome.delivered);
        tracing::debug!(
            room_id = %room,
            delivered = outcome.delivered,
            failed = outcome.failed,
            pruned = outcome.pruned,
            "broadcast update"
        );

        outcome
    }

    /// Consume an update event reported by the external backend
    pub fn dispatch(&self, event: UpdateEvent) -> NotifyOutcome {
        tracing::debug!(
            room_id = %event.room_id,
            source = event.source.as_str(),
            "dispatching update event"
        );
        self.notify(&event.room_id, event.payload)
    }

    pub fn member_count(&self, room_id: &str) -> usize {
        let Ok(room) = RoomId::parse(room_id) else {
            return 0;
        };
        let state = self.inner.lock();
        state.rooms.get(&room).map(HashSet::len).unwrap_or(0)
    }

    pub fn is_member(&self, conn_id: ConnectionId, room_id: &str) -> bool {
        let Ok(room) = RoomId::parse(room_id) else {
            return false;
        };
        let state = self.inner.lock();
        state
            .rooms
            .get(&room)
            .map(|members| members.contains(&conn_id))
            .unwrap_or(false)
    }

    /// Rooms a connection currently belongs to, sorted
    pub fn rooms_of(&self, conn_id: ConnectionId) -> Vec<RoomId> {
        let state = self.inner.lock();
        let mut rooms: Vec<RoomId> = state
            .connections
            .get(&conn_id)
            .map(|conn| conn.rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    pub fn room_snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
        let room = RoomId::parse(room_id).ok()?;
        let state = self.inner.lock();
        let members = state.rooms.get(&room)?;

        let mut connections: Vec<ConnectionSummary> = members
            .iter()
            .filter_map(|conn_id| {
                state.connections.get(conn_id).map(|conn| ConnectionSummary {
                    connection_id: *conn_id,
                    connected_at: conn.connected_at,
                })
            })
            .collect();
        connections.sort_by_key(|c| c.connected_at);

        Some(RoomSnapshot {
            room_id: room,
            member_count: connections.len(),
            connections,
        })
    }

    pub fn stats(&self) -> HubStats {
        self.inner.lock().stats()
    }
}

/// Checks the payload's owner field against the room id
fn check_owner(room: &RoomId, payload: &Value) -> Result<(), &'static str> {
    let object = payload.as_object().ok_or("payload is not an object")?;
    let owner = OWNER_FIELDS
        .iter()
        .find_map(|field| object.get(*field))
        .ok_or("payload has no owner field")?;

    match owner.as_str() {
        Some(owner) if owner == room.as_str() => Ok(()),
        Some(_) => Err("payload owner does not match room"),
        None => Err("payload owner is not a string"),
    }
}
