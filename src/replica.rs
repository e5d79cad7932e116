//! Authoritative in-memory replica of one document.

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, Options, ReadTxn, StateVector, Transact, Update};

use crate::error::SyncError;
use crate::registry::ConnectionId;
use crate::validate;

/// v1 encoding of an update with no structs and an empty delete set.
pub const EMPTY_UPDATE: [u8; 2] = [0, 0];

pub fn is_empty_update(update: &[u8]) -> bool {
    update == EMPTY_UPDATE
}

/// Local state changed. `update` holds exactly what the merge integrated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocChange {
    pub update: Vec<u8>,
    /// Connection that caused the change; `None` for server-side injection.
    pub origin: Option<ConnectionId>,
}

pub struct Replica {
    doc: Doc,
    gc: bool,
}

impl Replica {
    pub fn new(gc: bool) -> Self {
        let options = Options { skip_gc: !gc, ..Options::default() };
        Self { doc: Doc::with_options(options), gc }
    }

    pub fn gc_enabled(&self) -> bool {
        self.gc
    }

    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// Merge a remote update. Merging is idempotent, so a duplicate yields
    /// `Ok(None)`; so does an update parked until its dependencies arrive.
    pub fn apply_remote_update(&mut self, bytes: &[u8], origin: Option<ConnectionId>) -> Result<Option<DocChange>, SyncError> {
        validate::check_update_v1(bytes).map_err(|e| SyncError::InvalidUpdate(e.to_string()))?;
        let update = Update::decode_v1(bytes).map_err(|e| SyncError::InvalidUpdate(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update).map_err(|e| SyncError::Merge(e.to_string()))?;
        let integrated = txn.encode_update_v1();
        drop(txn);

        if is_empty_update(&integrated) {
            Ok(None)
        } else {
            Ok(Some(DocChange { update: integrated, origin }))
        }
    }

    /// Everything a peer holding `state_vector` is missing. An empty vector
    /// (`[0]`) yields the full state.
    pub fn diff_since(&self, state_vector: &[u8]) -> Result<Vec<u8>, SyncError> {
        validate::check_state_vector_v1(state_vector)
            .map_err(|e| SyncError::InvalidStateVector(e.to_string()))?;
        let sv = StateVector::decode_v1(state_vector).map_err(|e| SyncError::InvalidStateVector(e.to_string()))?;
        Ok(self.doc.transact().encode_state_as_update_v1(&sv))
    }

    pub fn state_vector(&self) -> Vec<u8> {
        self.doc.transact().state_vector().encode_v1()
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.doc.transact().encode_state_as_update_v1(&StateVector::default())
    }
}

impl Default for Replica {
    fn default() -> Self {
        Self::new(true)
    }
}
