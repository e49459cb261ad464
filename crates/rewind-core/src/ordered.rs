//! Map-order check for values written through the serde bridge.
//!
//! `bitcode` writes map entries in whatever order the map yields them, so a
//! `HashMap` inside a serde type would encode differently on every run. The
//! value is first walked with [`OrderSerializer`], which rebuilds every map
//! key as an [`OrderKey`] and fails if the keys are not strictly ascending.
//! `BTreeMap` always passes; a `HashMap` passes only when it happens to
//! yield its keys in order, in which case its encoding is already canonical.
//!
//! Sets serialize as plain sequences and cannot be told apart from a `Vec`
//! here. A `HashSet` inside a serde type is not detected.

use std::fmt;

use serde::Serialize;
use serde::ser;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub(crate) enum OrderError {
    #[error("map keys are not in strictly ascending order")]
    Unordered,
    #[error("{0}")]
    Custom(String),
}

impl ser::Error for OrderError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        OrderError::Custom(msg.to_string())
    }
}

// ---------------------------------------------------------------------------
// OrderKey
// ---------------------------------------------------------------------------

/// A serialized value with an ordering that matches the derived `Ord` of the
/// type it came from: integers by value, strings and bytes lexicographically,
/// structs and tuples field by field, enums by variant index then payload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum OrderKey {
    Unit,
    Bool(bool),
    Int(i128),
    UInt(u128),
    /// IEEE-754 bits rearranged so that integer order is `total_cmp` order.
    Float(i64),
    Str(String),
    Bytes(Vec<u8>),
    Seq(Vec<OrderKey>),
    Variant(u32, Box<OrderKey>),
}

fn float_key(bits: u64) -> OrderKey {
    let bits = bits as i64;
    OrderKey::Float(bits ^ ((((bits >> 63) as u64) >> 1) as i64))
}

/// Walk `value`, failing on the first map whose keys are out of order.
pub(crate) fn check_order<T: Serialize + ?Sized>(value: &T) -> Result<(), OrderError> {
    value.serialize(OrderSerializer).map(|_| ())
}

// ---------------------------------------------------------------------------
// OrderSerializer
// ---------------------------------------------------------------------------

pub(crate) struct OrderSerializer;

impl ser::Serializer for OrderSerializer {
    type Ok = OrderKey;
    type Error = OrderError;
    type SerializeSeq = SeqKeys;
    type SerializeTuple = SeqKeys;
    type SerializeTupleStruct = SeqKeys;
    type SerializeTupleVariant = SeqKeys;
    type SerializeMap = MapKeys;
    type SerializeStruct = SeqKeys;
    type SerializeStructVariant = SeqKeys;

    fn serialize_bool(self, v: bool) -> Result<OrderKey, OrderError> {
        Ok(OrderKey::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<OrderKey, OrderError> {
        Ok(OrderKey::Int(v.into()))
    }
    fn serialize_i16(self, v: i16) -> Result<OrderKey, OrderError> {
        Ok(OrderKey::Int(v.into()))
    }
    fn serialize_i32(self, v: i32) -> Result<OrderKey, OrderError> {
        Ok(OrderKey::Int(v.into()))
    }
    fn serialize_i64(self, v: i64) -> Result<OrderKey, OrderError> {
        Ok(OrderKey::Int(v.into()))
    }
    fn serialize_i128(self, v: i128) -> Result<OrderKey, OrderError> {
        Ok(OrderKey::Int(v))
    }

    fn serialize_u8(self, v: u8) -> Result<OrderKey, OrderError> {
        Ok(OrderKey::Int(v.into()))
    }
    fn serialize_u16(self, v: u16) -> Result<OrderKey, OrderError> {
        Ok(OrderKey::Int(v.into()))
    }
    fn serialize_u32(self, v: u32) -> Result<OrderKey, OrderError> {
        Ok(OrderKey::Int(v.into()))
    }
    fn serialize_u64(self, v: u64) -> Result<OrderKey, OrderError> {
        Ok(OrderKey::Int(v.into()))
    }
    fn serialize_u128(self, v: u128) -> Result<OrderKey, OrderError> {
        Ok(OrderKey::UInt(v))
    }

    fn serialize_f32(self, v: f32) -> Result<OrderKey, OrderError> {
        Ok(float_key(f64::from(v).to_bits()))
    }
    fn serialize_f64(self, v: f64) -> Result<OrderKey, OrderError> {
        Ok(float_key(v.to_bits()))
    }

    fn serialize_char(self, v: char) -> Result<OrderKey, OrderError> {
        Ok(OrderKey::Int(u32::from(v).into()))
    }
    fn serialize_str(self, v: &str) -> Result<OrderKey, OrderError> {
        Ok(OrderKey::Str(v.to_owned()))
    }
    fn serialize_bytes(self, v: &[u8]) -> Result<OrderKey, OrderError> {
        Ok(OrderKey::Bytes(v.to_vec()))
    }

    fn serialize_none(self) -> Result<OrderKey, OrderError> {
        Ok(OrderKey::Variant(0, Box::new(OrderKey::Unit)))
    }
    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<OrderKey, OrderError> {
        Ok(OrderKey::Variant(1, Box::new(value.serialize(self)?)))
    }

    fn serialize_unit(self) -> Result<OrderKey, OrderError> {
        Ok(OrderKey::Unit)
    }
    fn serialize_unit_struct(self, _name: &'static str) -> Result<OrderKey, OrderError> {
        Ok(OrderKey::Unit)
    }
    fn serialize_unit_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
    ) -> Result<OrderKey, OrderError> {
        Ok(OrderKey::Variant(variant_index, Box::new(OrderKey::Unit)))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<OrderKey, OrderError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Result<OrderKey, OrderError> {
        Ok(OrderKey::Variant(
            variant_index,
            Box::new(value.serialize(self)?),
        ))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqKeys, OrderError> {
        Ok(SeqKeys::new(None, len.unwrap_or(0)))
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqKeys, OrderError> {
        Ok(SeqKeys::new(None, len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SeqKeys, OrderError> {
        Ok(SeqKeys::new(None, len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        len: usize,
    ) -> Result<SeqKeys, OrderError> {
        Ok(SeqKeys::new(Some(variant_index), len))
    }

    fn serialize_map(self, len: Option<usize>) -> Result<MapKeys, OrderError> {
        Ok(MapKeys {
            entries: Vec::with_capacity(len.unwrap_or(0)),
            key: None,
            last: None,
        })
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> Result<SeqKeys, OrderError> {
        Ok(SeqKeys::new(None, len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        len: usize,
    ) -> Result<SeqKeys, OrderError> {
        Ok(SeqKeys::new(Some(variant_index), len))
    }
}

// ---------------------------------------------------------------------------
// Compound values
// ---------------------------------------------------------------------------

/// Sequences, tuples and struct fields, optionally inside an enum variant.
pub(crate) struct SeqKeys {
    variant: Option<u32>,
    items: Vec<OrderKey>,
}

impl SeqKeys {
    fn new(variant: Option<u32>, len: usize) -> Self {
        Self {
            variant,
            items: Vec::with_capacity(len),
        }
    }

    fn push<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), OrderError> {
        self.items.push(value.serialize(OrderSerializer)?);
        Ok(())
    }

    fn finish(self) -> OrderKey {
        let seq = OrderKey::Seq(self.items);
        match self.variant {
            Some(index) => OrderKey::Variant(index, Box::new(seq)),
            None => seq,
        }
    }
}

impl ser::SerializeSeq for SeqKeys {
    type Ok = OrderKey;
    type Error = OrderError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), OrderError> {
        self.push(value)
    }

    fn end(self) -> Result<OrderKey, OrderError> {
        Ok(self.finish())
    }
}

impl ser::SerializeTuple for SeqKeys {
    type Ok = OrderKey;
    type Error = OrderError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), OrderError> {
        self.push(value)
    }

    fn end(self) -> Result<OrderKey, OrderError> {
        Ok(self.finish())
    }
}

impl ser::SerializeTupleStruct for SeqKeys {
    type Ok = OrderKey;
    type Error = OrderError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), OrderError> {
        self.push(value)
    }

    fn end(self) -> Result<OrderKey, OrderError> {
        Ok(self.finish())
    }
}

impl ser::SerializeTupleVariant for SeqKeys {
    type Ok = OrderKey;
    type Error = OrderError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), OrderError> {
        self.push(value)
    }

    fn end(self) -> Result<OrderKey, OrderError> {
        Ok(self.finish())
    }
}

impl ser::SerializeStruct for SeqKeys {
    type Ok = OrderKey;
    type Error = OrderError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), OrderError> {
        self.push(value)
    }

    fn end(self) -> Result<OrderKey, OrderError> {
        Ok(self.finish())
    }
}

impl ser::SerializeStructVariant for SeqKeys {
    type Ok = OrderKey;
    type Error = OrderError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), OrderError> {
        self.push(value)
    }

    fn end(self) -> Result<OrderKey, OrderError> {
        Ok(self.finish())
    }
}

/// Map entries. Each key must be strictly greater than the one before it.
pub(crate) struct MapKeys {
    entries: Vec<OrderKey>,
    key: Option<OrderKey>,
    last: Option<OrderKey>,
}

impl ser::SerializeMap for MapKeys {
    type Ok = OrderKey;
    type Error = OrderError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), OrderError> {
        let key = key.serialize(OrderSerializer)?;
        if self.last.as_ref().is_some_and(|previous| *previous >= key) {
            return Err(OrderError::Unordered);
        }
        self.last = Some(key.clone());
        self.key = Some(key);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), OrderError> {
        let key = self
            .key
            .take()
            .ok_or_else(|| OrderError::Custom("map value without a key".into()))?;
        let value = value.serialize(OrderSerializer)?;
        self.entries.push(OrderKey::Seq(vec![key, value]));
        Ok(())
    }

    fn end(self) -> Result<OrderKey, OrderError> {
        Ok(OrderKey::Seq(self.entries))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};

    fn key<T: Serialize>(value: &T) -> OrderKey {
        value.serialize(OrderSerializer).unwrap()
    }

    #[test]
    fn integer_keys_follow_value_order() {
        assert!(key(&-5i32) < key(&3i32));
        assert!(key(&1u64) < key(&u64::MAX));
        assert!(key(&'a') < key(&'b'));
    }

    #[test]
    fn float_keys_follow_total_order() {
        let values = [f64::NEG_INFINITY, -2.5, -0.0, 0.0, 1e-9, 7.0, f64::INFINITY];
        for pair in values.windows(2) {
            assert!(key(&pair[0]) < key(&pair[1]), "{pair:?}");
        }
    }

    #[test]
    fn compound_keys_follow_derived_order() {
        #[derive(Serialize, PartialEq, Eq, PartialOrd, Ord)]
        enum Slot {
            Empty,
            Held(u8),
        }
        assert!(key(&Slot::Empty) < key(&Slot::Held(0)));
        assert!(key(&(1u8, "b")) < key(&(2u8, "a")));
        assert!(key(&"ab") < key(&"b"));
        assert!(key(&None::<u8>) < key(&Some(0u8)));
    }

    #[test]
    fn ordered_map_passes() {
        let map: BTreeMap<String, u32> = (0..50).map(|i| (format!("k{i:02}"), i)).collect();
        assert!(check_order(&map).is_ok());
    }

    #[test]
    fn hash_map_with_many_entries_fails() {
        let map: HashMap<u32, u32> = (0..64).map(|i| (i, i)).collect();
        assert!(matches!(check_order(&map), Err(OrderError::Unordered)));
    }

    #[test]
    fn nested_hash_map_fails() {
        let inner: HashMap<u32, u32> = (0..64).map(|i| (i, i)).collect();
        let outer = vec![(1u8, inner)];
        assert!(matches!(check_order(&outer), Err(OrderError::Unordered)));
    }
}
