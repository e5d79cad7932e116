use crate::actor::client::{ClientActor, ClientActorArgs};
use crate::actor::document::{DocActor, DocActorArgs};
use crate::actor::messages::{CreateClient, DocLookup, FindDoc, Join, ListDocs, RequestDoc};
use crate::config::ServerConfig;
use crate::hooks::Hook;
use kameo::{
    actor::{Actor, ActorRef, WeakActorRef, ActorId, Spawn},
    error::{ActorStopReason, Infallible},
    message::{Context, Message},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::ops::ControlFlow;
use std::future::Future;
use tracing::{debug, warn};

/// Owns the document map. Documents are created here on first use and are
/// never evicted, so memory grows with the number of distinct names.
pub struct Root {
    hooks: Arc<Vec<Box<dyn Hook>>>,
    config: Arc<ServerConfig>,
    active_docs: HashMap<Arc<str>, ActorRef<DocActor>>,
}

impl Root {
    pub fn new(config: ServerConfig, hooks: Vec<Box<dyn Hook>>) -> Self {
        Self { hooks: Arc::new(hooks), config: Arc::new(config), active_docs: HashMap::new() }
    }

    async fn lookup_or_create(&mut self, doc_name: Arc<str>, me: &ActorRef<Self>) -> ActorRef<DocActor> {
        if let Some(doc) = self.active_docs.get(&doc_name) { return doc.clone(); }
        debug!(doc = %doc_name, "creating document");
        let args = DocActorArgs { doc_name: Arc::clone(&doc_name), config: Arc::clone(&self.config), hooks: Arc::clone(&self.hooks) };
        let doc = DocActor::spawn_link(me, args).await;
        self.active_docs.insert(doc_name, doc.clone());
        doc
    }
}

impl Default for Root { fn default() -> Self { Self::new(ServerConfig::default(), Vec::new()) } }

impl Actor for Root {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, _: ActorRef<Self>) -> Result<Self, Self::Error> { Ok(state) }

    fn on_link_died(&mut self, _: WeakActorRef<Self>, id: ActorId, reason: ActorStopReason) -> impl Future<Output = Result<ControlFlow<ActorStopReason>, Self::Error>> + Send {
        let doc_name = self.active_docs.iter().find(|(_, a)| a.id() == id).map(|(d, _)| Arc::clone(d));
        if let Some(doc_name) = doc_name {
            // only reachable if a document actor panicked; its state is gone
            warn!(doc = %doc_name, ?reason, "document actor stopped");
            self.active_docs.remove(&doc_name);
        }
        async { Ok(ControlFlow::Continue(())) }
    }
}

impl Message<RequestDoc> for Root {
    type Reply = ActorRef<DocActor>;

    async fn handle(&mut self, RequestDoc(doc_name): RequestDoc, ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.lookup_or_create(doc_name, ctx.actor_ref()).await
    }
}

impl Message<FindDoc> for Root {
    type Reply = DocLookup;

    async fn handle(&mut self, FindDoc(doc_name): FindDoc, _: &mut Context<Self, Self::Reply>) -> DocLookup {
        DocLookup(self.active_docs.get(&doc_name).cloned())
    }
}

impl Message<ListDocs> for Root {
    type Reply = Vec<String>;

    async fn handle(&mut self, _: ListDocs, _: &mut Context<Self, Self::Reply>) -> Vec<String> {
        let mut names: Vec<String> = self.active_docs.keys().map(|k| k.to_string()).collect();
        names.sort();
        names
    }
}

impl Message<CreateClient> for Root {
    type Reply = ();

    async fn handle(&mut self, msg: CreateClient, ctx: &mut Context<Self, Self::Reply>) {
        // the document is resolved by the client once on_connect admits it
        let args = ClientActorArgs {
            socket: msg.socket,
            root: ctx.actor_ref().clone(),
            doc_name: msg.doc_name,
            request_info: msg.request_info,
            hooks: Arc::clone(&self.hooks),
        };
        let client = ClientActor::spawn(args);
        if client.tell(Join).send().await.is_err() {
            warn!("client actor stopped before joining");
        }
    }
}
