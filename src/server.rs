use axum::{
    Router,
    extract::{FromRequestParts, Query, Request, State, ws::WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use kameo::actor::{ActorRef, Spawn};
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tower::ServiceExt;
use tracing::{debug, info};

use crate::actor::document::DocActor;
use crate::actor::{ApplyServerUpdate, CreateClient, DocLookup, FindDoc, GetPeerCount, GetSnapshot, ListDocs, RequestDoc, Root};
use crate::config::ServerConfig;
use crate::dispatch::{Route, UpgradeDispatcher};
use crate::hooks::{Hook, RequestInfo};

/// Document sync gateway.
///
/// Every request path that does not start with a reserved segment names a
/// document. Reserved segments are handed to the router registered for them,
/// which sees the full, unmodified request.
///
/// ```no_run
/// use coral::Server;
/// use axum::{Router, routing::get};
///
/// # async fn run() -> std::io::Result<()> {
/// let chat = Router::new().route("/chat/{room}", get(|| async { "chat" }));
/// Server::new()
///     .with_sibling("chat", chat)
///     .serve("0.0.0.0:1234")
///     .await
/// # }
/// ```
#[derive(Clone)]
pub struct Server {
    root: ActorRef<Root>,
    dispatcher: UpgradeDispatcher,
    siblings: Vec<Option<Router>>,
}

/// Handle for reaching documents from outside a socket, e.g. HTTP handlers.
#[derive(Clone)]
pub struct Handle {
    root: ActorRef<Root>,
}

struct Gateway {
    root: ActorRef<Root>,
    dispatcher: UpgradeDispatcher,
    siblings: Vec<Option<Router>>,
}

impl Handle {
    /// Merge an update into a document, creating the document if needed.
    /// Connected peers receive it as a sync update. Returns true if the
    /// document changed.
    pub async fn apply_update(&self, doc_name: &str, update: Vec<u8>) -> bool {
        let Ok(doc) = self.root.ask(RequestDoc(doc_name.into())).send().await else { return false };
        doc.ask(ApplyServerUpdate(update)).send().await.unwrap_or(false)
    }

    /// Full state of a live document as a v1 update.
    pub async fn snapshot(&self, doc_name: &str) -> Option<Vec<u8>> {
        let doc = self.find(doc_name).await?;
        doc.ask(GetSnapshot).send().await.ok()
    }

    pub async fn peer_count(&self, doc_name: &str) -> usize {
        let Some(doc) = self.find(doc_name).await else { return 0 };
        doc.ask(GetPeerCount).send().await.unwrap_or(0)
    }

    /// Names of every document created since startup, sorted.
    pub async fn document_names(&self) -> Vec<String> {
        self.root.ask(ListDocs).send().await.unwrap_or_default()
    }

    async fn find(&self, doc_name: &str) -> Option<ActorRef<DocActor>> {
        let DocLookup(doc) = self.root.ask(FindDoc(doc_name.into())).send().await.ok()?;
        doc
    }
}

impl Server {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self::with_hooks(config, Vec::new())
    }

    pub fn with_hooks(config: ServerConfig, hooks: Vec<Box<dyn Hook>>) -> Self {
        let dispatcher = UpgradeDispatcher::new(config.default_document.as_str());
        let root = Root::spawn(Root::new(config, hooks));
        Self { root, dispatcher, siblings: Vec::new() }
    }

    /// Reserve a leading path segment without a router. Matching requests
    /// are answered with 404 instead of being treated as documents.
    pub fn reserve(mut self, prefix: &str) -> Self {
        if self.dispatcher.reserve(prefix).is_some() {
            self.siblings.push(None);
        }
        self
    }

    /// Reserve a leading path segment and hand matching requests to `router`.
    pub fn with_sibling(mut self, prefix: &str, router: Router) -> Self {
        if self.dispatcher.reserve(prefix).is_some() {
            self.siblings.push(Some(router));
        }
        self
    }

    pub fn handle(&self) -> Handle {
        Handle { root: self.root.clone() }
    }

    pub fn into_router(self) -> Router {
        let gateway = Arc::new(Gateway { root: self.root, dispatcher: self.dispatcher, siblings: self.siblings });
        Router::new().fallback(dispatch).with_state(gateway)
    }

    pub async fn serve(self, addr: impl ToSocketAddrs) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Serve on an already bound listener until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, signal: F) -> io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "listening");
        }
        axum::serve(listener, self.into_router()).with_graceful_shutdown(signal).await
    }
}

impl Default for Server { fn default() -> Self { Self::new() } }

async fn dispatch(State(gateway): State<Arc<Gateway>>, request: Request) -> Response {
    let route = gateway.dispatcher.route(request.uri().path());
    match route {
        Ok(Route::Sibling(index)) => match gateway.siblings.get(index).cloned().flatten() {
            Some(router) => match router.oneshot(request).await {
                Ok(response) => response,
                Err(never) => match never {},
            },
            None => StatusCode::NOT_FOUND.into_response(),
        },
        Ok(Route::Document(doc_name)) => upgrade(gateway.root.clone(), doc_name, request).await,
        Err(e) => {
            debug!(path = %request.uri().path(), error = %e, "rejected document path");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

async fn upgrade(root: ActorRef<Root>, doc_name: Arc<str>, request: Request) -> Response {
    let (mut parts, _) = request.into_parts();
    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    let query_params = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(q)| q)
        .unwrap_or_default();
    let request_info = RequestInfo::new(header_map(&parts.headers), query_params);

    ws.on_upgrade(move |socket| async move {
        let _ = root.ask(CreateClient { socket, doc_name, request_info }).send().await;
    })
}

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_lowercase(), v.to_string())))
        .collect()
}
