use kameo::{
    actor::{Actor, ActorRef},
    error::Infallible,
    message::{Context as KameoContext, Message, StreamMessage},
};
use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt, stream::{SplitSink, SplitStream}};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::actor::document::DocActor;
use crate::actor::messages::{CloseConnection, ConnectClient, DisconnectClient, Join, RequestDoc, WirePayload, YjsData};
use crate::actor::root::Root;
use crate::hooks::{Hook, OnConnectPayload, RequestInfo};
use crate::registry::ConnectionId;

pub struct ClientActorArgs {
    pub socket: WebSocket,
    pub root: ActorRef<Root>,
    pub doc_name: Arc<str>,
    pub request_info: RequestInfo,
    pub hooks: Arc<Vec<Box<dyn Hook>>>,
}

/// Owns one socket. Frames are read in order and forwarded to the document
/// actor; anything the document wants delivered arrives as [`WirePayload`].
pub struct ClientActor {
    connection_id: ConnectionId,
    sink: SplitSink<WebSocket, WsMessage>,
    /// Held back until the handshake is sent, then attached as a stream.
    stream: Option<SplitStream<WebSocket>>,
    root: ActorRef<Root>,
    doc_name: Arc<str>,
    /// Resolved once the connection is admitted.
    doc: Option<ActorRef<DocActor>>,
    joined: bool,
    request_info: RequestInfo,
    hooks: Arc<Vec<Box<dyn Hook>>>,
}

impl Actor for ClientActor {
    type Args = ClientActorArgs;
    type Error = Infallible;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        let (sink, stream) = args.socket.split();
        Ok(Self {
            connection_id: ConnectionId::from(actor_ref.id()),
            sink,
            stream: Some(stream),
            root: args.root,
            doc_name: args.doc_name,
            doc: None,
            joined: false,
            request_info: args.request_info,
            hooks: args.hooks,
        })
    }
}

impl ClientActor {
    async fn close(&mut self, code: u16, reason: &'static str) {
        let frame = CloseFrame { code, reason: reason.to_string().into() };
        let _ = self.sink.send(WsMessage::Close(Some(frame))).await;
    }

    /// Detach from the document (once) and stop.
    async fn shutdown(&mut self, me: &ActorRef<Self>) {
        if self.joined {
            self.joined = false;
            if let Some(doc) = &self.doc {
                let _ = doc.tell(DisconnectClient(self.connection_id)).send().await;
            }
        }
        me.kill();
    }

    /// Resolve the document and attach to it, returning the handshake frames.
    async fn connect_doc(&mut self, me: &ActorRef<Self>) -> Option<Vec<Vec<u8>>> {
        let doc = self.root.ask(RequestDoc(Arc::clone(&self.doc_name))).send().await.ok()?;
        let init = doc.ask(ConnectClient { connection_id: self.connection_id, client: me.clone() }).send().await.ok()?;
        self.doc = Some(doc);
        Some(init)
    }
}

impl Message<Join> for ClientActor {
    type Reply = ();

    async fn handle(&mut self, _: Join, ctx: &mut KameoContext<Self, Self::Reply>) {
        let me = ctx.actor_ref().clone();

        for hook in self.hooks.iter() {
            let payload = OnConnectPayload { doc_name: &self.doc_name, connection_id: self.connection_id, request: &self.request_info };
            if let Err(e) = hook.on_connect(payload).await {
                debug!(doc = %self.doc_name, connection = %self.connection_id, error = %e, "on_connect hook rejected connection");
                self.close(close_code::POLICY, "rejected").await;
                me.kill();
                return;
            }
        }

        let init = match self.connect_doc(&me).await {
            Some(init) => init,
            None => {
                warn!(doc = %self.doc_name, connection = %self.connection_id, "failed to attach to document");
                self.close(close_code::ERROR, "document unavailable").await;
                me.kill();
                return;
            }
        };
        self.joined = true;

        for payload in init {
            if self.sink.send(WsMessage::Binary(payload.into())).await.is_err() {
                self.shutdown(&me).await;
                return;
            }
        }

        if let Some(stream) = self.stream.take() {
            me.attach_stream(stream, (), "ws");
        }
    }
}

impl Message<StreamMessage<Result<WsMessage, axum::Error>, (), &'static str>> for ClientActor {
    type Reply = ();

    async fn handle(&mut self, msg: StreamMessage<Result<WsMessage, axum::Error>, (), &'static str>, ctx: &mut KameoContext<Self, Self::Reply>) {
        match msg {
            StreamMessage::Next(Ok(WsMessage::Binary(data))) => {
                let Some(doc) = &self.doc else { return };
                if doc.tell(YjsData { connection_id: self.connection_id, data }).send().await.is_err() {
                    let me = ctx.actor_ref().clone();
                    self.shutdown(&me).await;
                }
            }
            StreamMessage::Next(Ok(WsMessage::Text(text))) => {
                debug!(connection = %self.connection_id, len = text.as_str().len(), "ignoring text frame");
            }
            StreamMessage::Next(Ok(WsMessage::Ping(data))) => {
                if self.sink.send(WsMessage::Pong(data)).await.is_err() {
                    let me = ctx.actor_ref().clone();
                    self.shutdown(&me).await;
                }
            }
            StreamMessage::Next(Ok(WsMessage::Close(_))) | StreamMessage::Finished(_) => {
                let me = ctx.actor_ref().clone();
                self.shutdown(&me).await;
            }
            StreamMessage::Next(Err(e)) => {
                debug!(connection = %self.connection_id, error = %e, "socket error");
                let me = ctx.actor_ref().clone();
                self.shutdown(&me).await;
            }
            _ => {}
        }
    }
}

impl Message<WirePayload> for ClientActor {
    type Reply = ();
    async fn handle(&mut self, msg: WirePayload, ctx: &mut KameoContext<Self, Self::Reply>) {
        if self.sink.send(WsMessage::Binary(msg.0)).await.is_err() {
            debug!(connection = %self.connection_id, "send failed, dropping connection");
            let me = ctx.actor_ref().clone();
            self.shutdown(&me).await;
        }
    }
}

impl Message<CloseConnection> for ClientActor {
    type Reply = ();
    async fn handle(&mut self, msg: CloseConnection, ctx: &mut KameoContext<Self, Self::Reply>) {
        // the document has already detached us
        self.joined = false;
        self.close(msg.code, msg.reason).await;
        ctx.actor_ref().kill();
    }
}
