use axum::extract::ws::WebSocket;
use bytes::Bytes;
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::reply::{Reply, ReplyError};
use std::sync::Arc;

use crate::actor::client::ClientActor;
use crate::actor::document::DocActor;
use crate::hooks::RequestInfo;
use crate::registry::ConnectionId;

// Root

pub struct CreateClient {
    pub socket: WebSocket,
    pub doc_name: Arc<str>,
    pub request_info: RequestInfo,
}

/// Look up a document, creating it on first use.
pub struct RequestDoc(pub Arc<str>);

/// Look up a document without creating it.
pub struct FindDoc(pub Arc<str>);

pub struct ListDocs;

// Document

pub struct ConnectClient {
    pub connection_id: ConnectionId,
    pub client: ActorRef<ClientActor>,
}

pub struct DisconnectClient(pub ConnectionId);

pub struct YjsData {
    pub connection_id: ConnectionId,
    pub data: Bytes,
}

pub struct ApplyServerUpdate(pub Vec<u8>);

pub struct GetSnapshot;

pub struct GetPeerCount;

pub struct ExpireAwareness;

// Client

/// Run admission hooks, attach to the document and start reading the socket.
pub struct Join;

pub struct WirePayload(pub Bytes);

pub struct CloseConnection {
    pub code: u16,
    pub reason: &'static str,
}

/// Newtype wrapper so an optional document ref can be an actor reply.
pub struct DocLookup(pub Option<ActorRef<DocActor>>);

impl Reply for DocLookup {
    type Ok = Self;
    type Error = Infallible;
    type Value = Self;

    fn to_result(self) -> Result<Self, Infallible> { Ok(self) }
    fn into_any_err(self) -> Option<Box<dyn ReplyError>> { None }
    fn into_value(self) -> Self::Value { self }
}
