use kameo::{
    actor::{Actor, ActorRef, WeakActorRef, ActorId},
    error::{ActorStopReason, Infallible},
    message::{Context as KameoContext, Message},
};
use axum::extract::ws::close_code;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use std::time::Instant;
use std::collections::HashMap;
use std::sync::Arc;
use std::ops::ControlFlow;
use std::future::Future;
use tracing::{debug, warn};

use crate::actor::client::ClientActor;
use crate::actor::messages::{ApplyServerUpdate, CloseConnection, ConnectClient, DisconnectClient, ExpireAwareness, GetPeerCount, GetSnapshot, WirePayload, YjsData};
use crate::awareness::AwarenessChange;
use crate::config::ServerConfig;
use crate::hooks::{Hook, OnAwarenessChangePayload, OnChangePayload, OnPeerJoinedPayload, OnPeerLeftPayload};
use crate::registry::{Broadcast, ConnectionId, Dispatch, Room};
use crate::replica::DocChange;

/// Serializes every access to one document: replica, awareness and the
/// connection registry live inside this actor.
pub struct DocActor {
    doc_name: Arc<str>,
    room: Room,
    peers: HashMap<ConnectionId, Peer>,
    awareness_timeout: Option<Duration>,
    hooks: Arc<Vec<Box<dyn Hook>>>,
}

pub struct DocActorArgs {
    pub doc_name: Arc<str>,
    pub config: Arc<ServerConfig>,
    pub hooks: Arc<Vec<Box<dyn Hook>>>,
}

enum Outbound {
    Payload(Bytes),
    Close { code: u16, reason: &'static str },
}

/// An attached client and its outbox. Everything queued for one connection
/// reaches it in order; the document never waits on a client mailbox.
struct Peer {
    client: ActorRef<ClientActor>,
    outbox: mpsc::UnboundedSender<Outbound>,
}

impl Peer {
    fn new(client: ActorRef<ClientActor>) -> Self {
        let (outbox, mut rx) = mpsc::unbounded_channel();
        let c = client.clone();
        tokio::spawn(async move {
            while let Some(out) = rx.recv().await {
                let delivered = match out {
                    Outbound::Payload(payload) => c.tell(WirePayload(payload)).send().await.is_ok(),
                    Outbound::Close { code, reason } => c.tell(CloseConnection { code, reason }).send().await.is_ok(),
                };
                if !delivered { break; }
            }
        });
        Self { client, outbox }
    }
}

impl DocActor {
    fn send(&self, to: ConnectionId, payload: Bytes) {
        if let Some(peer) = self.peers.get(&to) {
            let _ = peer.outbox.send(Outbound::Payload(payload));
        }
    }

    fn broadcast(&self, broadcast: Broadcast) {
        let wire = Bytes::from(broadcast.payload);
        for id in broadcast.recipients {
            self.send(id, wire.clone());
        }
    }

    fn deliver(&self, origin: ConnectionId, out: Dispatch) {
        for reply in out.replies {
            self.send(origin, Bytes::from(reply));
        }
        for broadcast in out.broadcasts {
            self.broadcast(broadcast);
        }
    }

    fn close(&self, id: ConnectionId, code: u16, reason: &'static str) {
        if let Some(peer) = self.peers.get(&id) {
            let _ = peer.outbox.send(Outbound::Close { code, reason });
        }
    }

    /// Teardown for one connection. Safe to call repeatedly; only the first
    /// call has any effect.
    fn handle_client_left(&mut self, id: ConnectionId) -> Option<ActorRef<ClientActor>> {
        let client = self.peers.remove(&id).map(|p| p.client);
        let detached = self.room.detach(id)?;
        debug!(doc = %self.doc_name, connection = %id, remaining = detached.remaining, "connection detached");
        if let Some(broadcast) = detached.broadcast {
            self.broadcast(broadcast);
        }

        let doc_name = Arc::clone(&self.doc_name);
        let hooks = Arc::clone(&self.hooks);
        let change = detached.awareness;
        let peer_count = detached.remaining;
        tokio::spawn(async move {
            for hook in hooks.iter() {
                if !change.is_empty() {
                    let _ = hook.on_awareness_change(OnAwarenessChangePayload { doc_name: &doc_name, change: &change }).await;
                }
                let _ = hook.on_peer_left(OnPeerLeftPayload { doc_name: &doc_name, connection_id: id, peer_count, removed_clients: &change.removed }).await;
            }
        });
        client
    }

    async fn notify_doc_change(&self, change: &DocChange) {
        for hook in self.hooks.iter() {
            if let Err(e) = hook.on_change(OnChangePayload { doc_name: &self.doc_name, origin: change.origin, update: &change.update }).await {
                warn!(doc = %self.doc_name, error = %e, "on_change hook failed");
            }
        }
    }

    async fn notify_awareness_change(&self, change: &AwarenessChange) {
        for hook in self.hooks.iter() {
            if let Err(e) = hook.on_awareness_change(OnAwarenessChangePayload { doc_name: &self.doc_name, change }).await {
                warn!(doc = %self.doc_name, error = %e, "on_awareness_change hook failed");
            }
        }
    }

    fn schedule_expiry(actor: WeakActorRef<Self>, timeout: Duration) {
        let period = (timeout / 10).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(actor) = actor.upgrade() else { break };
                if actor.tell(ExpireAwareness).send().await.is_err() { break; }
            }
        });
    }
}

impl Actor for DocActor {
    type Args = DocActorArgs;
    type Error = Infallible;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        if let Some(timeout) = args.config.awareness_timeout {
            Self::schedule_expiry(actor_ref.downgrade(), timeout);
        }
        Ok(Self {
            room: Room::new(Arc::clone(&args.doc_name), args.config.gc),
            doc_name: args.doc_name,
            peers: HashMap::new(),
            awareness_timeout: args.config.awareness_timeout,
            hooks: args.hooks,
        })
    }

    fn on_link_died(&mut self, _: WeakActorRef<Self>, id: ActorId, _: ActorStopReason) -> impl Future<Output = Result<ControlFlow<ActorStopReason>, Self::Error>> + Send {
        let connection = ConnectionId::from(id);
        if self.peers.contains_key(&connection) {
            self.handle_client_left(connection);
        }
        async { Ok(ControlFlow::Continue(())) }
    }
}

impl Message<ConnectClient> for DocActor {
    type Reply = Vec<Vec<u8>>;
    async fn handle(&mut self, msg: ConnectClient, ctx: &mut KameoContext<Self, Self::Reply>) -> Self::Reply {
        ctx.actor_ref().link(&msg.client).await;
        let connection_id = msg.connection_id;
        self.peers.insert(connection_id, Peer::new(msg.client));
        let init = self.room.attach(connection_id);
        debug!(doc = %self.doc_name, connection = %connection_id, peers = self.room.connection_count(), "connection attached");

        let peer_count = self.room.connection_count();
        let doc_name = Arc::clone(&self.doc_name);
        let hooks = Arc::clone(&self.hooks);
        tokio::spawn(async move {
            for hook in hooks.iter() {
                let _ = hook.on_peer_joined(OnPeerJoinedPayload { doc_name: &doc_name, connection_id, peer_count }).await;
            }
        });

        init
    }
}

impl Message<DisconnectClient> for DocActor {
    type Reply = ();
    async fn handle(&mut self, DisconnectClient(id): DisconnectClient, ctx: &mut KameoContext<Self, Self::Reply>) {
        if let Some(client) = self.handle_client_left(id) {
            ctx.actor_ref().unlink(&client).await;
        }
    }
}

impl Message<YjsData> for DocActor {
    type Reply = ();
    async fn handle(&mut self, msg: YjsData, ctx: &mut KameoContext<Self, Self::Reply>) {
        let origin = msg.connection_id;
        let mut out = Dispatch::default();
        let result = self.room.handle_frame(origin, &msg.data, &mut out);

        let doc_changes = std::mem::take(&mut out.doc_changes);
        let awareness_changes = std::mem::take(&mut out.awareness_changes);
        self.deliver(origin, out);
        for change in &doc_changes { self.notify_doc_change(change).await; }
        for change in &awareness_changes { self.notify_awareness_change(change).await; }

        match result {
            Ok(()) => {}
            Err(crate::error::SyncError::NotAttached(_)) => {
                debug!(doc = %self.doc_name, connection = %origin, "dropping frame from detached connection");
            }
            Err(e) => {
                warn!(doc = %self.doc_name, connection = %origin, error = %e, "closing connection");
                let (code, reason) = if e.is_malformed() { (close_code::PROTOCOL, "malformed message") } else { (close_code::POLICY, "update rejected") };
                self.close(origin, code, reason);
                if let Some(client) = self.handle_client_left(origin) {
                    ctx.actor_ref().unlink(&client).await;
                }
            }
        }
    }
}

impl Message<ApplyServerUpdate> for DocActor {
    type Reply = bool;
    async fn handle(&mut self, ApplyServerUpdate(update): ApplyServerUpdate, _: &mut KameoContext<Self, Self::Reply>) -> bool {
        match self.room.apply_external_update(&update) {
            Ok(Some((change, broadcast))) => {
                if let Some(broadcast) = broadcast { self.broadcast(broadcast); }
                self.notify_doc_change(&change).await;
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(doc = %self.doc_name, error = %e, "rejected server-side update");
                false
            }
        }
    }
}

impl Message<ExpireAwareness> for DocActor {
    type Reply = ();
    async fn handle(&mut self, _: ExpireAwareness, _: &mut KameoContext<Self, Self::Reply>) {
        let Some(timeout) = self.awareness_timeout else { return };
        if let Some((change, broadcast)) = self.room.expire_awareness(Instant::now(), timeout) {
            debug!(doc = %self.doc_name, clients = ?change.removed, "awareness expired");
            if let Some(broadcast) = broadcast { self.broadcast(broadcast); }
            self.notify_awareness_change(&change).await;
        }
    }
}

impl Message<GetSnapshot> for DocActor {
    type Reply = Vec<u8>;
    async fn handle(&mut self, _: GetSnapshot, _: &mut KameoContext<Self, Self::Reply>) -> Self::Reply {
        self.room.replica().snapshot()
    }
}

impl Message<GetPeerCount> for DocActor {
    type Reply = usize;
    async fn handle(&mut self, _: GetPeerCount, _: &mut KameoContext<Self, Self::Reply>) -> Self::Reply {
        self.room.connection_count()
    }
}
