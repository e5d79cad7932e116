//! Property-based tests for merge convergence and decoder robustness

use coral::awareness::AwarenessUpdate;
use coral::protocol::Message;
use coral::replica::Replica;
use coral::validate;
use proptest::prelude::*;
use yrs::updates::decoder::Decode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Text, Transact, Update};

const WRITERS: usize = 3;

/// (writer, position hint, inserted text)
type Edit = (usize, u32, String);

fn edits() -> impl Strategy<Value = Vec<Edit>> {
    prop::collection::vec((0..WRITERS, any::<u32>(), "[a-z]{1,4}"), 1..24)
}

/// Replay edits on independent writer replicas, collecting the update each
/// edit produced. Writers never see each other's edits, so every insert is
/// concurrent with the other writers' inserts.
fn record_updates(edits: &[Edit]) -> Vec<Vec<u8>> {
    let writers: Vec<Doc> = (0..WRITERS).map(|_| Doc::new()).collect();
    edits
        .iter()
        .map(|(writer, hint, chunk)| {
            let doc = &writers[*writer];
            let text = doc.get_or_insert_text("content");
            let mut txn = doc.transact_mut();
            let len = text.get_string(&txn).len() as u32;
            text.insert(&mut txn, hint % (len + 1), chunk);
            txn.encode_update_v1()
        })
        .collect()
}

fn content(replica: &Replica) -> String {
    let text = replica.doc().get_or_insert_text("content");
    text.get_string(&replica.doc().transact())
}

fn edits_with_order() -> impl Strategy<Value = (Vec<Edit>, Vec<usize>)> {
    edits().prop_flat_map(|edits| {
        let order: Vec<usize> = (0..edits.len()).collect();
        (Just(edits), Just(order).prop_shuffle())
    })
}

proptest! {
    #[test]
    fn any_delivery_order_converges((edits, order) in edits_with_order()) {
        let updates = record_updates(&edits);

        let mut in_order = Replica::default();
        for update in &updates {
            in_order.apply_remote_update(update, None).unwrap();
        }

        let mut shuffled = Replica::default();
        for &i in &order {
            shuffled.apply_remote_update(&updates[i], None).unwrap();
        }

        prop_assert_eq!(content(&in_order), content(&shuffled));
        prop_assert_eq!(
            in_order.doc().transact().state_vector(),
            shuffled.doc().transact().state_vector()
        );
    }

    #[test]
    fn redelivery_changes_nothing(edits in edits()) {
        let updates = record_updates(&edits);
        let mut replica = Replica::default();
        for update in &updates {
            replica.apply_remote_update(update, None).unwrap();
        }
        let before = content(&replica);
        for update in &updates {
            prop_assert!(replica.apply_remote_update(update, None).unwrap().is_none());
        }
        prop_assert_eq!(content(&replica), before);
    }

    #[test]
    fn arbitrary_bytes_never_panic_the_frame_decoders(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let _ = Message::decode_frame(&bytes);
        let _ = AwarenessUpdate::decode(&bytes);
    }

    #[test]
    fn corrupted_updates_that_pass_the_layout_check_decode(
        edits in edits(),
        flips in prop::collection::vec((any::<prop::sample::Index>(), any::<u8>()), 1..4),
    ) {
        let mut replica = Replica::default();
        for update in record_updates(&edits) {
            replica.apply_remote_update(&update, None).unwrap();
        }
        let mut bytes = replica.snapshot();
        for (at, byte) in &flips {
            let i = at.index(bytes.len());
            bytes[i] = *byte;
        }
        if validate::check_update_v1(&bytes).is_ok() {
            let _ = Update::decode_v1(&bytes);
        }
        if validate::check_state_vector_v1(&bytes).is_ok() {
            let _ = StateVector::decode_v1(&bytes);
        }
    }
}
