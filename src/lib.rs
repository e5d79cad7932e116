//! # Coral
//!
//! Yjs document sync gateway with awareness. Each request path names a
//! shared document; peers on the same path converge through the y-sync
//! protocol and share ephemeral presence through awareness messages.
//!
//! ## Quick Start
//!
//! ```no_run
//! use coral::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::new()
//!         .serve("0.0.0.0:1234")
//!         .await
//!         .unwrap();
//! }
//! ```
//!
//! ## Sharing the Port
//!
//! Reserved leading segments are handed to sibling routers, everything else
//! is a document.
//!
//! ```no_run
//! use coral::{Server, ServerConfig};
//! use axum::{Router, routing::get};
//!
//! #[tokio::main]
//! async fn main() {
//!     let chat = Router::new().route("/chat/{room}", get(|| async { "chat" }));
//!     let server = Server::with_config(ServerConfig::default()).with_sibling("chat", chat);
//!     let handle = server.handle();
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:1234").await.unwrap();
//!     tokio::spawn(server.serve_with_shutdown(listener, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }));
//!
//!     println!("{} peers on /notes", handle.peer_count("notes").await);
//! }
//! ```
//!
//! ## Hooks
//!
//! ```no_run
//! use coral::{Server, ServerConfig, Hook, HookResult, OnConnectPayload};
//! use async_trait::async_trait;
//!
//! struct RequireToken;
//!
//! #[async_trait]
//! impl Hook for RequireToken {
//!     async fn on_connect(&self, p: OnConnectPayload<'_>) -> HookResult {
//!         match p.request.token.as_deref() {
//!             Some("let-me-in") => Ok(()),
//!             _ => Err("missing token".into()),
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::with_hooks(ServerConfig::default(), vec![Box::new(RequireToken)])
//!         .serve("0.0.0.0:1234")
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod awareness;
pub mod config;
pub mod dispatch;
pub mod encoding;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod replica;
pub mod validate;

mod hooks;
mod actor;
mod server;

// Public API
pub use server::{Server, Handle};
pub use config::{Config, ConfigError, ServerConfig};
pub use error::SyncError;
pub use registry::ConnectionId;
pub use hooks::{
    Hook, HookResult, HookError, RequestInfo,
    OnConnectPayload, OnChangePayload, OnAwarenessChangePayload,
    OnPeerJoinedPayload, OnPeerLeftPayload,
};

pub use axum;
pub use async_trait::async_trait;
