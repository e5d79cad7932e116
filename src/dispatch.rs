//! Decides, per upgrade request, whether the path belongs to a sibling
//! subsystem or names a document served here.
//!
//! Reserved prefixes are whole leading path segments: with `chat` reserved,
//! `/chat` and `/chat/lobby` are deferred while `/chatter` is a document.
//! Routes are checked in registration order and the first match wins;
//! anything unmatched is claimed.

use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("document path is not valid utf-8 after percent-decoding")]
    InvalidEncoding,
    #[error("document name contains control characters")]
    ControlCharacter,
    #[error("document name starts with reserved segment `{0}`")]
    ReservedSegment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Hand the request to the sibling registered at this index.
    Sibling(usize),
    /// Claim the request for the named document.
    Document(Arc<str>),
}

#[derive(Debug, Clone)]
pub struct UpgradeDispatcher {
    reserved: Vec<String>,
    default_document: Arc<str>,
}

impl UpgradeDispatcher {
    pub fn new(default_document: impl Into<Arc<str>>) -> Self {
        Self { reserved: Vec::new(), default_document: default_document.into() }
    }

    /// Reserve a leading segment for a sibling. Surrounding slashes are
    /// ignored; an empty segment cannot be reserved.
    pub fn reserve(&mut self, prefix: &str) -> Option<usize> {
        let segment = prefix.trim_matches('/');
        if segment.is_empty() {
            return None;
        }
        self.reserved.push(segment.to_string());
        Some(self.reserved.len() - 1)
    }

    pub fn reserved(&self) -> &[String] {
        &self.reserved
    }

    pub fn default_document(&self) -> &str {
        &self.default_document
    }

    pub fn route(&self, path: &str) -> Result<Route, DispatchError> {
        let raw = path.strip_prefix('/').unwrap_or(path);
        let leading = raw.split('/').next().unwrap_or_default();
        if let Some(index) = self.reserved_index(leading) {
            return Ok(Route::Sibling(index));
        }

        if raw.is_empty() {
            return Ok(Route::Document(Arc::clone(&self.default_document)));
        }

        let name = urlencoding::decode(raw).map_err(|_| DispatchError::InvalidEncoding)?;
        if name.chars().any(char::is_control) {
            return Err(DispatchError::ControlCharacter);
        }
        let decoded_leading = name.split('/').next().unwrap_or_default();
        if let Some(index) = self.reserved_index(decoded_leading) {
            return Err(DispatchError::ReservedSegment(self.reserved[index].clone()));
        }
        Ok(Route::Document(name.as_ref().into()))
    }

    fn reserved_index(&self, segment: &str) -> Option<usize> {
        self.reserved.iter().position(|r| r == segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> UpgradeDispatcher {
        let mut d = UpgradeDispatcher::new("default");
        d.reserve("/chat/");
        d.reserve("presence");
        d
    }

    fn doc(name: &str) -> Route {
        Route::Document(name.into())
    }

    #[test]
    fn empty_path_maps_to_default_document() {
        let d = dispatcher();
        assert_eq!(d.route("/"), Ok(doc("default")));
        assert_eq!(d.route(""), Ok(doc("default")));
    }

    #[test]
    fn remainder_of_path_is_the_document_name() {
        let d = dispatcher();
        assert_eq!(d.route("/doc1"), Ok(doc("doc1")));
        assert_eq!(d.route("/notes/2024/q1"), Ok(doc("notes/2024/q1")));
        assert_eq!(d.route("/team%20board"), Ok(doc("team board")));
    }

    #[test]
    fn reserved_segments_defer_to_siblings_in_order() {
        let d = dispatcher();
        assert_eq!(d.route("/chat"), Ok(Route::Sibling(0)));
        assert_eq!(d.route("/chat/lobby"), Ok(Route::Sibling(0)));
        assert_eq!(d.route("/presence/x"), Ok(Route::Sibling(1)));
    }

    #[test]
    fn reserved_token_must_be_a_whole_segment() {
        let d = dispatcher();
        assert_eq!(d.route("/chatter"), Ok(doc("chatter")));
        assert_eq!(d.route("/my/chat"), Ok(doc("my/chat")));
    }

    #[test]
    fn encoded_reserved_segment_is_rejected() {
        let d = dispatcher();
        assert_eq!(d.route("/chat%2Flobby"), Err(DispatchError::ReservedSegment("chat".into())));
    }

    #[test]
    fn undecodable_names_are_rejected() {
        let d = dispatcher();
        assert_eq!(d.route("/%FF%FE"), Err(DispatchError::InvalidEncoding));
        assert_eq!(d.route("/a%0Ab"), Err(DispatchError::ControlCharacter));
    }

    #[test]
    fn empty_prefix_cannot_be_reserved() {
        let mut d = UpgradeDispatcher::new("default");
        assert_eq!(d.reserve("/"), None);
        assert!(d.reserved().is_empty());
    }
}
