//! The encodable value type and its binary serialization.
//!
//! A typed binary format rather than a generic serde backend, so that
//! compression/signing operate on a deterministic byte stream. Each
//! variant is a one-byte tag followed by a fixed-width payload;
//! sequences and maps are length-prefixed.

use std::collections::BTreeMap;

use crate::error::{CacheError, CacheResult};

/// Any value the codec pipeline can carry: primitives, ordered sequences,
/// and string-keyed mappings composing them.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The absence of a value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed 64-bit integer.
    Int(i64),
    /// A 64-bit float.
    Float(f64),
    /// A raw byte string.
    Bytes(Vec<u8>),
    /// A UTF-8 string.
    Str(String),
    /// An ordered sequence of values.
    Seq(Vec<Value>),
    /// A mapping keyed by string, ordered deterministically by key so the
    /// encoded form of equal maps is always byte-identical.
    Map(BTreeMap<String, Value>),
}

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_BYTES: u8 = 4;
const TAG_STR: u8 = 5;
const TAG_SEQ: u8 = 6;
const TAG_MAP: u8 = 7;

impl Value {
    /// Encode this value into the compact typed binary format.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Value::Null => out.push(TAG_NULL),
            Value::Bool(b) => {
                out.push(TAG_BOOL);
                out.push(if *b { 1 } else { 0 });
            }
            Value::Int(i) => {
                out.push(TAG_INT);
                out.extend_from_slice(&i.to_le_bytes());
            }
            Value::Float(f) => {
                out.push(TAG_FLOAT);
                out.extend_from_slice(&f.to_le_bytes());
            }
            Value::Bytes(b) => {
                out.push(TAG_BYTES);
                out.extend_from_slice(&(b.len() as u64).to_le_bytes());
                out.extend_from_slice(b);
            }
            Value::Str(s) => {
                out.push(TAG_STR);
                let bytes = s.as_bytes();
                out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
                out.extend_from_slice(bytes);
            }
            Value::Seq(items) => {
                out.push(TAG_SEQ);
                out.extend_from_slice(&(items.len() as u64).to_le_bytes());
                for item in items {
                    item.encode_into(out);
                }
            }
            Value::Map(map) => {
                out.push(TAG_MAP);
                out.extend_from_slice(&(map.len() as u64).to_le_bytes());
                for (k, v) in map {
                    let kb = k.as_bytes();
                    out.extend_from_slice(&(kb.len() as u64).to_le_bytes());
                    out.extend_from_slice(kb);
                    v.encode_into(out);
                }
            }
        }
    }

    /// Decode a value previously produced by [`Value::encode`].
    pub fn decode(bytes: &[u8]) -> CacheResult<Value> {
        let mut cursor = 0usize;
        let value = Value::decode_from(bytes, &mut cursor)?;
        if cursor != bytes.len() {
            return Err(CacheError::Serialization(
                "trailing bytes after decoding value".to_string(),
            ));
        }
        Ok(value)
    }

    fn decode_from(bytes: &[u8], cursor: &mut usize) -> CacheResult<Value> {
        let tag = take_u8(bytes, cursor)?;
        match tag {
            TAG_NULL => Ok(Value::Null),
            TAG_BOOL => Ok(Value::Bool(take_u8(bytes, cursor)? != 0)),
            TAG_INT => Ok(Value::Int(i64::from_le_bytes(take_array(bytes, cursor)?))),
            TAG_FLOAT => Ok(Value::Float(f64::from_le_bytes(take_array(bytes, cursor)?))),
            TAG_BYTES => {
                let len = take_len(bytes, cursor)?;
                Ok(Value::Bytes(take_n(bytes, cursor, len)?.to_vec()))
            }
            TAG_STR => {
                let len = take_len(bytes, cursor)?;
                let raw = take_n(bytes, cursor, len)?;
                let s = std::str::from_utf8(raw)
                    .map_err(|e| CacheError::Serialization(format!("invalid utf-8: {e}")))?;
                Ok(Value::Str(s.to_string()))
            }
            TAG_SEQ => {
                let len = take_len(bytes, cursor)?;
                let mut items = Vec::with_capacity(len.min(1 << 20));
                for _ in 0..len {
                    items.push(Value::decode_from(bytes, cursor)?);
                }
                Ok(Value::Seq(items))
            }
            TAG_MAP => {
                let len = take_len(bytes, cursor)?;
                let mut map = BTreeMap::new();
                for _ in 0..len {
                    let klen = take_len(bytes, cursor)?;
                    let kraw = take_n(bytes, cursor, klen)?;
                    let key = std::str::from_utf8(kraw)
                        .map_err(|e| CacheError::Serialization(format!("invalid utf-8 key: {e}")))?
                        .to_string();
                    let value = Value::decode_from(bytes, cursor)?;
                    map.insert(key, value);
                }
                Ok(Value::Map(map))
            }
            other => Err(CacheError::Serialization(format!(
                "unknown value tag {other}"
            ))),
        }
    }
}

fn take_u8(bytes: &[u8], cursor: &mut usize) -> CacheResult<u8> {
    let b = *bytes
        .get(*cursor)
        .ok_or_else(|| CacheError::Serialization("unexpected end of buffer".to_string()))?;
    *cursor += 1;
    Ok(b)
}

fn take_array<const N: usize>(bytes: &[u8], cursor: &mut usize) -> CacheResult<[u8; N]> {
    let slice = take_n(bytes, cursor, N)?;
    let mut arr = [0u8; N];
    arr.copy_from_slice(slice);
    Ok(arr)
}

fn take_len(bytes: &[u8], cursor: &mut usize) -> CacheResult<usize> {
    let arr: [u8; 8] = take_array(bytes, cursor)?;
    Ok(u64::from_le_bytes(arr) as usize)
}

fn take_n<'a>(bytes: &'a [u8], cursor: &mut usize, n: usize) -> CacheResult<&'a [u8]> {
    let end = cursor
        .checked_add(n)
        .ok_or_else(|| CacheError::Serialization("length overflow".to_string()))?;
    let slice = bytes
        .get(*cursor..end)
        .ok_or_else(|| CacheError::Serialization("unexpected end of buffer".to_string()))?;
    *cursor = end;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_primitives() {
        for v in [
            Value::Null,
            Value::Bool(true),
            Value::Bool(false),
            Value::Int(-42),
            Value::Float(3.5),
            Value::Bytes(vec![1, 2, 3]),
            Value::Str("hello".to_string()),
        ] {
            let encoded = v.encode();
            assert_eq!(Value::decode(&encoded).unwrap(), v);
        }
    }

    #[test]
    fn roundtrips_nested_structures() {
        let mut map = BTreeMap::new();
        map.insert("n".to_string(), Value::Int(42));
        map.insert(
            "xs".to_string(),
            Value::Seq(vec![Value::Int(1), Value::Int(2)]),
        );
        let v = Value::Map(map);
        let encoded = v.encode();
        assert_eq!(Value::decode(&encoded).unwrap(), v);
    }

    #[test]
    fn rejects_truncated_buffer() {
        let v = Value::Str("hello".to_string());
        let mut encoded = v.encode();
        encoded.truncate(encoded.len() - 2);
        assert!(Value::decode(&encoded).is_err());
    }

    #[test]
    fn rejects_trailing_garbage() {
        let v = Value::Int(1);
        let mut encoded = v.encode();
        encoded.push(0xFF);
        assert!(Value::decode(&encoded).is_err());
    }
}

/// Property-based round-trip tests using `proptest`, covering the type
/// matrix `spec.md` §8's invariant 5 names (nested sequences and maps
/// composing every primitive) beyond the hand-picked cases above.
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            any::<f64>().prop_filter("exclude NaN", |f| !f.is_nan()).prop_map(Value::Float),
            proptest::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
            "[a-zA-Z0-9 ]{0,32}".prop_map(Value::Str),
        ]
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        arb_leaf().prop_recursive(4, 64, 8, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..8).prop_map(Value::Seq),
                proptest::collection::btree_map("[a-z]{1,8}", inner, 0..8).prop_map(Value::Map),
            ]
        })
    }

    proptest! {
        #[test]
        fn encode_decode_roundtrips_arbitrary_values(v in arb_value()) {
            let encoded = v.encode();
            let decoded = Value::decode(&encoded).unwrap();
            prop_assert_eq!(decoded, v);
        }

        #[test]
        fn decode_never_panics_on_arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = Value::decode(&bytes);
        }
    }
}
