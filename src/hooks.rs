use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error;

use crate::awareness::{AwarenessChange, ClientId};
use crate::registry::ConnectionId;

pub type HookResult = Result<(), Box<dyn Error + Send + Sync>>;
pub type HookError = Box<dyn Error + Send + Sync>;

/// HTTP request info captured at WebSocket upgrade.
#[derive(Clone, Default, Debug)]
pub struct RequestInfo {
    pub headers: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub token: Option<String>,
}

impl RequestInfo {
    pub fn new(headers: HashMap<String, String>, query_params: HashMap<String, String>) -> Self {
        let token = query_params.get("token").cloned().or_else(|| {
            headers.get("authorization").and_then(|h| h.strip_prefix("Bearer ").map(|t| t.to_string()))
        });
        Self { headers, query_params, token }
    }
}

// ============================================================================
// Payloads
// ============================================================================

pub struct OnConnectPayload<'a> {
    pub doc_name: &'a str,
    pub connection_id: ConnectionId,
    pub request: &'a RequestInfo,
}

pub struct OnChangePayload<'a> {
    pub doc_name: &'a str,
    /// `None` for updates applied through [`crate::Handle::apply_update`].
    pub origin: Option<ConnectionId>,
    pub update: &'a [u8],
}

pub struct OnAwarenessChangePayload<'a> {
    pub doc_name: &'a str,
    pub change: &'a AwarenessChange,
}

pub struct OnPeerJoinedPayload<'a> {
    pub doc_name: &'a str,
    pub connection_id: ConnectionId,
    pub peer_count: usize,
}

pub struct OnPeerLeftPayload<'a> {
    pub doc_name: &'a str,
    pub connection_id: ConnectionId,
    pub peer_count: usize,
    /// Awareness clients tombstoned because this connection left.
    pub removed_clients: &'a [ClientId],
}

// ============================================================================
// Hook Trait
// ============================================================================

#[async_trait]
pub trait Hook: Send + Sync {
    /// Called before a connection attaches. An error closes it unattached.
    async fn on_connect(&self, _payload: OnConnectPayload<'_>) -> HookResult { Ok(()) }

    /// Called after every merge that changed the document.
    async fn on_change(&self, _payload: OnChangePayload<'_>) -> HookResult { Ok(()) }

    /// Called when awareness entries were added, updated or removed.
    async fn on_awareness_change(&self, _payload: OnAwarenessChangePayload<'_>) -> HookResult { Ok(()) }

    /// Called when a connection attached to a document.
    async fn on_peer_joined(&self, _payload: OnPeerJoinedPayload<'_>) -> HookResult { Ok(()) }

    /// Called once per connection when it is detached.
    async fn on_peer_left(&self, _payload: OnPeerLeftPayload<'_>) -> HookResult { Ok(()) }
}
