//! Per-document connection registry and fan-out router.
//!
//! A [`Room`] owns the replica, the awareness table and the set of attached
//! connections. Every entry point returns what has to be sent and to whom;
//! the caller (the document actor) performs the sends.

use kameo::actor::ActorId;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::awareness::{Awareness, AwarenessChange, AwarenessUpdate, ClientId};
use crate::error::SyncError;
use crate::protocol::{Message, SyncMessage};
use crate::replica::{is_empty_update, DocChange, Replica};

/// Handle for one live connection: the sequence id of the actor that owns
/// its socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl From<ActorId> for ConnectionId {
    fn from(id: ActorId) -> Self {
        Self(id.sequence_id())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Connection {
    /// Awareness client ids announced over this connection.
    controlled: BTreeSet<ClientId>,
}

/// One encoded message and the connections it goes to. Recipients are
/// captured when the broadcast is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    pub payload: Vec<u8>,
    pub recipients: Vec<ConnectionId>,
}

/// Outcome of handling inbound traffic from one connection.
#[derive(Debug, Default)]
pub struct Dispatch {
    /// Sent back to the originating connection only.
    pub replies: Vec<Vec<u8>>,
    pub broadcasts: Vec<Broadcast>,
    pub doc_changes: Vec<DocChange>,
    pub awareness_changes: Vec<AwarenessChange>,
}

impl Dispatch {
    pub fn is_empty(&self) -> bool {
        self.replies.is_empty() && self.broadcasts.is_empty()
    }
}

#[derive(Debug)]
pub struct Detached {
    pub awareness: AwarenessChange,
    pub broadcast: Option<Broadcast>,
    pub remaining: usize,
}

pub struct Room {
    name: Arc<str>,
    replica: Replica,
    awareness: Awareness,
    connections: BTreeMap<ConnectionId, Connection>,
}

impl Room {
    pub fn new(name: Arc<str>, gc: bool) -> Self {
        Self { name, replica: Replica::new(gc), awareness: Awareness::new(), connections: BTreeMap::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn awareness(&self) -> &Awareness {
        &self.awareness
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_attached(&self, conn: ConnectionId) -> bool {
        self.connections.contains_key(&conn)
    }

    pub fn controlled_clients(&self, conn: ConnectionId) -> Vec<ClientId> {
        self.connections.get(&conn).map(|c| c.controlled.iter().copied().collect()).unwrap_or_default()
    }

    /// Register `conn` and return the opening messages: our step1 and, when
    /// anyone is present, an awareness snapshot. Re-attaching keeps the
    /// controlled set and repeats the handshake.
    pub fn attach(&mut self, conn: ConnectionId) -> Vec<Vec<u8>> {
        self.connections.entry(conn).or_default();
        let mut init = vec![Message::Sync(SyncMessage::Step1(self.replica.state_vector())).encode()];
        let present = self.awareness.present_clients();
        if !present.is_empty() {
            let snapshot = self.awareness.encode_update(&present);
            init.push(Message::Awareness(snapshot.encode()).encode());
        }
        init
    }

    /// Decode and apply one frame from `conn`. Effects of messages handled
    /// before an error stay in `out` so they can still be delivered.
    pub fn handle_frame(&mut self, conn: ConnectionId, data: &[u8], out: &mut Dispatch) -> Result<(), SyncError> {
        if !self.is_attached(conn) {
            return Err(SyncError::NotAttached(conn));
        }
        for msg in Message::decode_frame(data)? {
            self.handle_message(conn, msg, out)?;
        }
        Ok(())
    }

    pub fn handle_message(&mut self, conn: ConnectionId, msg: Message, out: &mut Dispatch) -> Result<(), SyncError> {
        match msg {
            Message::Sync(SyncMessage::Step1(sv)) => {
                let diff = self.replica.diff_since(&sv)?;
                if is_empty_update(&diff) {
                    debug!(doc = %self.name, connection = %conn, "peer already up to date, step2 suppressed");
                } else {
                    out.replies.push(Message::Sync(SyncMessage::Step2(diff)).encode());
                }
            }
            Message::Sync(SyncMessage::Step2(update) | SyncMessage::Update(update)) => {
                if let Some(change) = self.replica.apply_remote_update(&update, Some(conn))? {
                    out.broadcasts.extend(self.broadcast_update(&change));
                    out.doc_changes.push(change);
                }
            }
            Message::Awareness(bytes) => {
                let update = AwarenessUpdate::decode(&bytes)?;
                let change = self.apply_awareness(conn, update);
                if !change.is_empty() {
                    out.broadcasts.extend(self.broadcast_awareness(&change));
                    out.awareness_changes.push(change);
                }
            }
        }
        Ok(())
    }

    /// Merge an update that did not come from any connection; it goes to
    /// every attached connection.
    pub fn apply_external_update(&mut self, update: &[u8]) -> Result<Option<(DocChange, Option<Broadcast>)>, SyncError> {
        Ok(self.replica.apply_remote_update(update, None)?.map(|change| {
            let broadcast = self.broadcast_update(&change);
            (change, broadcast)
        }))
    }

    /// Remove `conn` and tombstone the awareness clients it controlled.
    /// Returns `None` if `conn` was not attached.
    pub fn detach(&mut self, conn: ConnectionId) -> Option<Detached> {
        let connection = self.connections.remove(&conn)?;
        let controlled: Vec<ClientId> = connection.controlled.into_iter().collect();
        let change = self.awareness.remove(&controlled, Some(conn));
        let broadcast = self.broadcast_awareness(&change);
        Some(Detached { awareness: change, broadcast, remaining: self.connections.len() })
    }

    /// Tombstone awareness entries not renewed within `timeout`; the removal
    /// goes to everyone.
    pub fn expire_awareness(&mut self, now: Instant, timeout: Duration) -> Option<(AwarenessChange, Option<Broadcast>)> {
        let change = self.awareness.expire(now, timeout);
        if change.is_empty() {
            return None;
        }
        let broadcast = self.broadcast_awareness(&change);
        Some((change, broadcast))
    }

    fn apply_awareness(&mut self, conn: ConnectionId, mut update: AwarenessUpdate) -> AwarenessChange {
        update.records.retain(|record| match self.owner_of(record.client_id) {
            Some(owner) if owner != conn => {
                warn!(doc = %self.name, connection = %conn, owner = %owner, client = record.client_id, "rejecting awareness write for foreign client");
                false
            }
            _ => true,
        });
        let change = self.awareness.apply_update(&update, Some(conn));
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.controlled.extend(change.added.iter().chain(&change.updated).copied());
            for id in &change.removed {
                connection.controlled.remove(id);
            }
        }
        change
    }

    fn owner_of(&self, client: ClientId) -> Option<ConnectionId> {
        self.connections.iter().find(|(_, c)| c.controlled.contains(&client)).map(|(id, _)| *id)
    }

    fn recipients(&self, exclude: Option<ConnectionId>) -> Vec<ConnectionId> {
        self.connections.keys().copied().filter(|id| Some(*id) != exclude).collect()
    }

    fn broadcast_update(&self, change: &DocChange) -> Option<Broadcast> {
        let recipients = self.recipients(change.origin);
        if recipients.is_empty() {
            return None;
        }
        let payload = Message::Sync(SyncMessage::Update(change.update.clone())).encode();
        Some(Broadcast { payload, recipients })
    }

    fn broadcast_awareness(&self, change: &AwarenessChange) -> Option<Broadcast> {
        if change.is_empty() {
            return None;
        }
        let recipients = self.recipients(change.origin);
        if recipients.is_empty() {
            return None;
        }
        let update = self.awareness.encode_update(&change.changed());
        Some(Broadcast { payload: Message::Awareness(update.encode()).encode(), recipients })
    }
}
