mod root;
pub(crate) mod document;
mod client;
pub(crate) mod messages;

pub(crate) use root::Root;
pub(crate) use messages::{ApplyServerUpdate, CreateClient, DocLookup, FindDoc, GetPeerCount, GetSnapshot, ListDocs, RequestDoc};
