//! Ephemeral per-client presence (cursors, selections, user metadata).
//!
//! Wire format of an awareness update, compatible with y-protocols:
//!
//! ```text
//! VarUint(n) { VarUint(client_id) VarUint(clock) VarString(json) } * n
//! ```
//!
//! The JSON text `null` marks the client as removed. Higher clocks win; a
//! removal with an equal clock also wins over a present state.

use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::encoding::{DecodeError, Decoder, Encoder};
use crate::registry::ConnectionId;

/// Client id assigned by the peer's CRDT library.
pub type ClientId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum AwarenessState {
    Present(Value),
    Removed,
}

impl AwarenessState {
    pub fn is_present(&self) -> bool {
        matches!(self, AwarenessState::Present(_))
    }
}

#[derive(Debug, Clone)]
struct Entry {
    clock: u64,
    state: AwarenessState,
    last_updated: Instant,
}

/// One decoded client record. `state: None` is a removal.
#[derive(Debug, Clone, PartialEq)]
pub struct AwarenessRecord {
    pub client_id: ClientId,
    pub clock: u64,
    pub state: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AwarenessUpdate {
    pub records: Vec<AwarenessRecord>,
}

impl AwarenessUpdate {
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.write_var_uint(self.records.len() as u64);
        for record in &self.records {
            enc.write_var_uint(record.client_id);
            enc.write_var_uint(record.clock);
            match &record.state {
                Some(state) => enc.write_var_string(&state.to_string()),
                None => enc.write_var_string("null"),
            }
        }
        enc.into_vec()
    }

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut dec = Decoder::new(data);
        let len = dec.read_var_uint()?;
        let mut records = Vec::new();
        for _ in 0..len {
            let client_id = dec.read_var_uint()?;
            let clock = dec.read_var_uint()?;
            let json = dec.read_var_string()?;
            let state: Value = serde_json::from_str(json).map_err(|_| DecodeError::InvalidAwarenessState(client_id))?;
            let state = if state.is_null() { None } else { Some(state) };
            records.push(AwarenessRecord { client_id, clock, state });
        }
        Ok(Self { records })
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Client ids whose state changed in one operation, and who caused it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwarenessChange {
    pub added: Vec<ClientId>,
    pub updated: Vec<ClientId>,
    pub removed: Vec<ClientId>,
    pub origin: Option<ConnectionId>,
}

impl AwarenessChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    pub fn changed(&self) -> Vec<ClientId> {
        self.added.iter().chain(&self.updated).chain(&self.removed).copied().collect()
    }
}

#[derive(Debug, Default)]
pub struct Awareness {
    entries: BTreeMap<ClientId, Entry>,
}

impl Awareness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_update(&mut self, update: &AwarenessUpdate, origin: Option<ConnectionId>) -> AwarenessChange {
        self.apply_update_at(update, origin, Instant::now())
    }

    pub fn apply_update_at(&mut self, update: &AwarenessUpdate, origin: Option<ConnectionId>, now: Instant) -> AwarenessChange {
        let mut change = AwarenessChange { origin, ..Default::default() };
        for record in &update.records {
            let current = self.entries.get(&record.client_id);
            let current_clock = current.map_or(0, |e| e.clock);
            let was_present = current.is_some_and(|e| e.state.is_present());
            let accept = current_clock < record.clock
                || (current_clock == record.clock && record.state.is_none() && was_present);
            if !accept {
                continue;
            }

            let state = match &record.state {
                Some(value) => {
                    if was_present {
                        change.updated.push(record.client_id);
                    } else {
                        change.added.push(record.client_id);
                    }
                    AwarenessState::Present(value.clone())
                }
                None => {
                    if was_present {
                        change.removed.push(record.client_id);
                    }
                    AwarenessState::Removed
                }
            };
            self.entries.insert(record.client_id, Entry { clock: record.clock, state, last_updated: now });
        }
        change
    }

    /// Tombstone every listed client that is still present.
    pub fn remove(&mut self, clients: &[ClientId], origin: Option<ConnectionId>) -> AwarenessChange {
        let now = Instant::now();
        let mut change = AwarenessChange { origin, ..Default::default() };
        for id in clients {
            if let Some(entry) = self.entries.get_mut(id) {
                if entry.state.is_present() {
                    entry.clock += 1;
                    entry.state = AwarenessState::Removed;
                    entry.last_updated = now;
                    change.removed.push(*id);
                }
            }
        }
        change
    }

    /// Tombstone present clients that have not renewed within `timeout`.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> AwarenessChange {
        let stale: Vec<ClientId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.state.is_present() && now.saturating_duration_since(e.last_updated) >= timeout)
            .map(|(id, _)| *id)
            .collect();
        self.remove(&stale, None)
    }

    /// Current state of the listed clients; unknown ids are skipped.
    pub fn encode_update(&self, clients: &[ClientId]) -> AwarenessUpdate {
        let records = clients
            .iter()
            .filter_map(|id| {
                self.entries.get(id).map(|e| AwarenessRecord {
                    client_id: *id,
                    clock: e.clock,
                    state: match &e.state {
                        AwarenessState::Present(v) => Some(v.clone()),
                        AwarenessState::Removed => None,
                    },
                })
            })
            .collect();
        AwarenessUpdate { records }
    }

    pub fn present_clients(&self) -> Vec<ClientId> {
        self.entries.iter().filter(|(_, e)| e.state.is_present()).map(|(id, _)| *id).collect()
    }

    pub fn state(&self, client: ClientId) -> Option<&AwarenessState> {
        self.entries.get(&client).map(|e| &e.state)
    }

    pub fn clock(&self, client: ClientId) -> Option<u64> {
        self.entries.get(&client).map(|e| e.clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(client_id: ClientId, clock: u64, state: Option<Value>) -> AwarenessUpdate {
        AwarenessUpdate { records: vec![AwarenessRecord { client_id, clock, state }] }
    }

    #[test]
    fn wire_format_matches_y_protocols() {
        let update = record(42, 1, Some(json!({"cursor": 5})));
        let bytes = update.encode();
        let mut expected = vec![1, 42, 1];
        let text = br#"{"cursor":5}"#;
        expected.push(text.len() as u8);
        expected.extend_from_slice(text);
        assert_eq!(bytes, expected);
        assert_eq!(AwarenessUpdate::decode(&bytes).unwrap(), update);
    }

    #[test]
    fn null_state_decodes_as_removal() {
        let bytes = record(7, 3, None).encode();
        let decoded = AwarenessUpdate::decode(&bytes).unwrap();
        assert_eq!(decoded.records[0].state, None);
    }

    #[test]
    fn invalid_json_is_malformed() {
        let mut enc = Encoder::new();
        enc.write_var_uint(1);
        enc.write_var_uint(9);
        enc.write_var_uint(1);
        enc.write_var_string("{not json");
        assert_eq!(AwarenessUpdate::decode(&enc.into_vec()), Err(DecodeError::InvalidAwarenessState(9)));
    }

    #[test]
    fn transitions_are_classified() {
        let mut awareness = Awareness::new();
        let origin = Some(ConnectionId(1));

        let change = awareness.apply_update(&record(42, 1, Some(json!({"cursor": 5}))), origin);
        assert_eq!(change.added, vec![42]);
        assert_eq!(change.origin, origin);

        let change = awareness.apply_update(&record(42, 2, Some(json!({"cursor": 6}))), origin);
        assert_eq!(change.updated, vec![42]);

        let change = awareness.apply_update(&record(42, 2, None), origin);
        assert_eq!(change.removed, vec![42]);
        assert_eq!(awareness.state(42), Some(&AwarenessState::Removed));

        let change = awareness.apply_update(&record(42, 3, Some(json!({"cursor": 1}))), origin);
        assert_eq!(change.added, vec![42]);
    }

    #[test]
    fn stale_clock_is_ignored() {
        let mut awareness = Awareness::new();
        awareness.apply_update(&record(5, 4, Some(json!("new"))), None);
        let change = awareness.apply_update(&record(5, 3, Some(json!("old"))), None);
        assert!(change.is_empty());
        assert_eq!(awareness.state(5), Some(&AwarenessState::Present(json!("new"))));

        // equal clock with a present state does not win either
        let change = awareness.apply_update(&record(5, 4, Some(json!("other"))), None);
        assert!(change.is_empty());
    }

    #[test]
    fn remove_bumps_clock_and_encodes_null() {
        let mut awareness = Awareness::new();
        awareness.apply_update(&record(42, 1, Some(json!({"cursor": 5}))), None);

        let change = awareness.remove(&[42, 99], None);
        assert_eq!(change.removed, vec![42]);
        assert_eq!(awareness.clock(42), Some(2));

        let encoded = awareness.encode_update(&[42]);
        assert_eq!(encoded.records, vec![AwarenessRecord { client_id: 42, clock: 2, state: None }]);

        // a second removal is a no-op
        assert!(awareness.remove(&[42], None).is_empty());
    }

    #[test]
    fn expire_only_touches_stale_present_clients() {
        let mut awareness = Awareness::new();
        let start = Instant::now();
        awareness.apply_update_at(&record(1, 1, Some(json!("a"))), None, start);
        awareness.apply_update_at(&record(2, 1, Some(json!("b"))), None, start + Duration::from_secs(20));

        let change = awareness.expire(start + Duration::from_secs(30), Duration::from_secs(30));
        assert_eq!(change.removed, vec![1]);
        assert_eq!(change.origin, None);
        assert_eq!(awareness.present_clients(), vec![2]);
    }

    #[test]
    fn encode_update_skips_unknown_clients() {
        let mut awareness = Awareness::new();
        awareness.apply_update(&record(3, 1, Some(json!(true))), None);
        let update = awareness.encode_update(&[3, 4]);
        assert_eq!(update.records.len(), 1);
        assert_eq!(update.records[0].client_id, 3);
    }
}
