//! Layout checks for untrusted yrs v1 payloads.
//!
//! yrs trusts the bytes it decodes: strings are not UTF-8 checked, several
//! counts size allocations up front and clocks are added in `u32`. Every
//! update and state vector from a peer is walked here first, so the yrs
//! decoder only ever sees payloads it can read without panicking.

use crate::encoding::{DecodeError, Decoder};

const BLOCK_GC: u8 = 0;
const BLOCK_SKIP: u8 = 10;

const HAS_ORIGIN: u8 = 0b1000_0000;
const HAS_RIGHT_ORIGIN: u8 = 0b0100_0000;
const HAS_PARENT_SUB: u8 = 0b0010_0000;

const CONTENT_DELETED: u8 = 1;
const CONTENT_JSON: u8 = 2;
const CONTENT_BINARY: u8 = 3;
const CONTENT_STRING: u8 = 4;
const CONTENT_EMBED: u8 = 5;
const CONTENT_FORMAT: u8 = 6;
const CONTENT_TYPE: u8 = 7;
const CONTENT_ANY: u8 = 8;
const CONTENT_DOC: u8 = 9;
const CONTENT_MOVE: u8 = 11;

const TYPE_XML_ELEMENT: u8 = 3;

/// Nesting limit for `Any` values.
const MAX_DEPTH: usize = 64;

/// Check that `bytes` holds a v1 update yrs can decode. Trailing bytes are
/// ignored, as yrs ignores them.
pub fn check_update_v1(bytes: &[u8]) -> Result<(), DecodeError> {
    let mut dec = Decoder::new(bytes);
    let clients = dec.read_var_u32()?;
    for _ in 0..clients {
        let blocks = dec.read_var_u32()?;
        let _client = dec.read_var_u32()?;
        let mut clock = u64::from(dec.read_var_u32()?);
        for _ in 0..blocks {
            clock += block(&mut dec)?;
            if clock > u64::from(u32::MAX) {
                return Err(DecodeError::ClockOverflow);
            }
        }
    }
    delete_set(&mut dec)
}

/// Check that `bytes` holds a v1 state vector yrs can decode.
pub fn check_state_vector_v1(bytes: &[u8]) -> Result<(), DecodeError> {
    let mut dec = Decoder::new(bytes);
    let len = dec.read_var_u32()?;
    for _ in 0..len {
        dec.read_var_uint()?;
        dec.read_var_u32()?;
    }
    Ok(())
}

/// Walk one block and return an upper bound of the clock span it covers.
fn block(dec: &mut Decoder<'_>) -> Result<u64, DecodeError> {
    let info = dec.read_u8()?;
    if info == BLOCK_GC || info == BLOCK_SKIP {
        return Ok(u64::from(dec.read_var_u32()?));
    }
    if info & HAS_ORIGIN != 0 {
        id(dec)?;
    }
    if info & HAS_RIGHT_ORIGIN != 0 {
        id(dec)?;
    }
    if info & (HAS_ORIGIN | HAS_RIGHT_ORIGIN) == 0 {
        if dec.read_var_u32()? == 1 {
            dec.read_var_string()?;
        } else {
            id(dec)?;
        }
        if info & HAS_PARENT_SUB != 0 {
            dec.read_var_string()?;
        }
    }
    content(dec, info & 0b1111)
}

fn content(dec: &mut Decoder<'_>, content_ref: u8) -> Result<u64, DecodeError> {
    match content_ref {
        CONTENT_DELETED => Ok(u64::from(dec.read_var_u32()?)),
        CONTENT_JSON => {
            // one more entry than the stated length
            let len = dec.read_var_u32()?;
            if i32::try_from(len).is_err() {
                return Err(DecodeError::OutOfRange(u64::from(len)));
            }
            for _ in 0..=len {
                dec.read_var_string()?;
            }
            Ok(u64::from(len) + 1)
        }
        CONTENT_BINARY => {
            bytes(dec)?;
            Ok(1)
        }
        CONTENT_STRING => Ok(dec.read_var_string()?.len() as u64),
        CONTENT_EMBED => {
            json(dec)?;
            Ok(1)
        }
        CONTENT_FORMAT => {
            dec.read_var_string()?;
            json(dec)?;
            Ok(1)
        }
        CONTENT_TYPE => {
            type_ref(dec)?;
            Ok(1)
        }
        CONTENT_ANY => {
            let len = dec.read_var_u32()?;
            for _ in 0..len {
                any(dec, 0)?;
            }
            Ok(u64::from(len))
        }
        CONTENT_DOC => {
            dec.read_var_string()?;
            any(dec, 0)?;
            Ok(1)
        }
        CONTENT_MOVE => {
            let flags = dec.read_var_int()?;
            let flags = i32::try_from(flags).map_err(|_| DecodeError::VarIntOverflow)?;
            id(dec)?;
            if flags & 1 == 0 {
                id(dec)?;
            }
            Ok(1)
        }
        other => Err(DecodeError::UnknownContent(other)),
    }
}

fn type_ref(dec: &mut Decoder<'_>) -> Result<(), DecodeError> {
    match dec.read_u8()? {
        // array, map, text, xml fragment, xml hook, xml text, subdoc, undefined
        0 | 1 | 2 | 4 | 5 | 6 | 9 | 15 => Ok(()),
        TYPE_XML_ELEMENT => dec.read_var_string().map(drop),
        other => Err(DecodeError::UnknownTypeRef(other)),
    }
}

fn any(dec: &mut Decoder<'_>, depth: usize) -> Result<(), DecodeError> {
    if depth >= MAX_DEPTH {
        return Err(DecodeError::NestingTooDeep);
    }
    match dec.read_u8()? {
        // undefined, null, false, true
        127 | 126 | 121 | 120 => Ok(()),
        125 => dec.read_var_int().map(drop),
        124 => dec.read_exact(4).map(drop),
        123 | 122 => dec.read_exact(8).map(drop),
        119 => dec.read_var_string().map(drop),
        118 => {
            let len = dec.read_var_uint()?;
            for _ in 0..len {
                dec.read_var_string()?;
                any(dec, depth + 1)?;
            }
            Ok(())
        }
        117 => {
            let len = dec.read_var_uint()?;
            for _ in 0..len {
                any(dec, depth + 1)?;
            }
            Ok(())
        }
        116 => bytes(dec),
        other => Err(DecodeError::UnknownValueTag(other)),
    }
}

fn json(dec: &mut Decoder<'_>) -> Result<(), DecodeError> {
    let text = dec.read_var_string()?;
    serde_json::from_str::<serde_json::Value>(text)
        .map(drop)
        .map_err(|_| DecodeError::InvalidJson)
}

fn bytes(dec: &mut Decoder<'_>) -> Result<(), DecodeError> {
    let len = dec.read_var_u32()?;
    dec.read_exact(len as usize).map(drop)
}

fn id(dec: &mut Decoder<'_>) -> Result<(), DecodeError> {
    dec.read_var_u32()?;
    dec.read_var_u32()?;
    Ok(())
}

fn delete_set(dec: &mut Decoder<'_>) -> Result<(), DecodeError> {
    let clients = dec.read_var_u32()?;
    for _ in 0..clients {
        dec.read_var_u32()?;
        let ranges = dec.read_var_u32()?;
        for _ in 0..ranges {
            let clock = dec.read_var_u32()?;
            let len = dec.read_var_u32()?;
            if clock.checked_add(len).is_none() {
                return Err(DecodeError::ClockOverflow);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Encoder;
    use yrs::updates::encoder::Encode;
    use yrs::{Array, Doc, Map, ReadTxn, Text, Transact};

    /// Text insert on root "content" whose inserted string is not UTF-8.
    const BAD_UTF8_UPDATE: [u8; 31] = [
        1, 1, 179, 142, 154, 251, 11, 0, 4, 1, 7, 99, 111, 110, 116, 94, 110, 116, 11, 104, 101,
        246, 108, 111, 32, 119, 111, 114, 108, 100, 0,
    ];

    fn rich_update() -> Vec<u8> {
        let doc = Doc::new();
        let text = doc.get_or_insert_text("content");
        let map = doc.get_or_insert_map("meta");
        let list = doc.get_or_insert_array("list");
        let mut txn = doc.transact_mut();
        text.insert(&mut txn, 0, "héllo wörld");
        text.remove_range(&mut txn, 1, 3);
        map.insert(&mut txn, "title", "draft");
        map.insert(&mut txn, "count", 42);
        map.insert(&mut txn, "ratio", 0.5);
        list.insert(&mut txn, 0, true);
        list.insert(&mut txn, 1, vec![1, 2, 3]);
        drop(txn);
        let update = doc.transact().encode_state_as_update_v1(&Default::default());
        update
    }

    #[test]
    fn updates_written_by_yrs_pass() {
        check_update_v1(&rich_update()).unwrap();
        check_update_v1(&[0, 0]).unwrap();
    }

    #[test]
    fn invalid_utf8_in_inserted_text_is_rejected() {
        assert_eq!(check_update_v1(&BAD_UTF8_UPDATE), Err(DecodeError::InvalidUtf8));
    }

    #[test]
    fn invalid_utf8_in_root_name_is_rejected() {
        let mut update = BAD_UTF8_UPDATE;
        update[14] = 0xFF;
        update[21] = b'l';
        assert_eq!(check_update_v1(&update), Err(DecodeError::InvalidUtf8));
    }

    #[test]
    fn every_truncation_is_rejected() {
        let update = rich_update();
        for end in 0..update.len() {
            assert!(check_update_v1(&update[..end]).is_err(), "prefix of {end} bytes passed");
        }
    }

    #[test]
    fn block_clock_overflow_is_rejected() {
        let mut enc = Encoder::new();
        enc.write_var_uint(1); // clients
        enc.write_var_uint(2); // blocks
        enc.write_var_uint(7); // client
        enc.write_var_uint(u64::from(u32::MAX) - 1); // clock
        enc.write_u8(BLOCK_GC);
        enc.write_var_uint(1);
        enc.write_u8(BLOCK_GC);
        enc.write_var_uint(1);
        enc.write_var_uint(0); // delete set
        assert_eq!(check_update_v1(&enc.into_vec()), Err(DecodeError::ClockOverflow));
    }

    #[test]
    fn delete_range_overflow_is_rejected() {
        let mut enc = Encoder::new();
        enc.write_var_uint(0); // no blocks
        enc.write_var_uint(1); // one deleting client
        enc.write_var_uint(7);
        enc.write_var_uint(1);
        enc.write_var_uint(u64::from(u32::MAX));
        enc.write_var_uint(1);
        assert_eq!(check_update_v1(&enc.into_vec()), Err(DecodeError::ClockOverflow));
    }

    #[test]
    fn huge_counts_without_payload_are_rejected() {
        let mut enc = Encoder::new();
        enc.write_var_uint(0);
        enc.write_var_uint(1);
        enc.write_var_uint(7);
        enc.write_var_uint(u64::from(u32::MAX));
        assert_eq!(check_update_v1(&enc.into_vec()), Err(DecodeError::UnexpectedEof));

        let mut enc = Encoder::new();
        enc.write_var_uint(u64::from(u32::MAX));
        assert_eq!(check_state_vector_v1(&enc.into_vec()), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn deeply_nested_values_are_rejected() {
        let mut enc = Encoder::new();
        enc.write_var_uint(1);
        enc.write_var_uint(1);
        enc.write_var_uint(7);
        enc.write_var_uint(0);
        enc.write_u8(CONTENT_ANY);
        enc.write_var_uint(1); // parent is a root type
        enc.write_var_string("list");
        enc.write_var_uint(1); // one value
        for _ in 0..=MAX_DEPTH {
            enc.write_u8(117);
            enc.write_var_uint(1);
        }
        enc.write_u8(126);
        enc.write_var_uint(0);
        assert_eq!(check_update_v1(&enc.into_vec()), Err(DecodeError::NestingTooDeep));
    }

    #[test]
    fn unknown_content_is_rejected() {
        let mut enc = Encoder::new();
        enc.write_var_uint(1);
        enc.write_var_uint(1);
        enc.write_var_uint(7);
        enc.write_var_uint(0);
        enc.write_u8(HAS_ORIGIN | 12);
        enc.write_var_uint(7);
        enc.write_var_uint(0);
        assert_eq!(check_update_v1(&enc.into_vec()), Err(DecodeError::UnknownContent(12)));
    }

    #[test]
    fn state_vectors_written_by_yrs_pass() {
        let doc = Doc::new();
        let text = doc.get_or_insert_text("content");
        text.insert(&mut doc.transact_mut(), 0, "abc");
        let sv = doc.transact().state_vector().encode_v1();
        check_state_vector_v1(&sv).unwrap();
        check_state_vector_v1(&[0]).unwrap();
        assert!(check_state_vector_v1(&sv[..sv.len() - 1]).is_err());
    }
}
