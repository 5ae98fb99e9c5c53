//! Serde deserializer reading from [`Value`]s.
//!
//! Values are self-describing, so every `deserialize_*` call that has no
//! special meaning here dispatches on the value kind through
//! `deserialize_any`.

use crate::datetime;
use crate::decode::decode_value;
use crate::error::{Error, Result};
use crate::schema::TypeHint;
use crate::settings::Config;
use crate::value::{MultiArray, Record, Value};
use crate::walker::Walker;
use serde::de::value::StringDeserializer;
use serde::de::{
    self, DeserializeOwned, DeserializeSeed, EnumAccess, IntoDeserializer, MapAccess, SeqAccess,
    VariantAccess, Visitor,
};
use serde::forward_to_deserialize_any;
use std::vec;

/// Deserialize a `T` from `value`. Shared handles are detached first.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    T::deserialize(value)
}

/// Deserialize a `T` from a bare `<value>` document, decoded without a
/// type hint.
pub fn from_str<T: DeserializeOwned>(text: &str, config: &Config) -> Result<T> {
    let walker = Walker::value(text.as_bytes());
    let value = decode_value(walker, &TypeHint::Any, &config.policy, &config.non_standard)?;
    from_value(value)
}

fn key_deserializer(key: String) -> StringDeserializer<Error> {
    key.into_deserializer()
}

/// Row-major items regrouped into nested arrays, outermost rank first.
fn nest(dims: &[usize], items: &mut vec::IntoIter<Value>) -> Value {
    match dims {
        [] => Value::Nil,
        [len] => Value::Array(items.by_ref().take(*len).collect()),
        [len, rest @ ..] => Value::Array((0..*len).map(|_| nest(rest, items)).collect()),
    }
}

fn multi_array_rows(arr: &MultiArray) -> Value {
    let mut items = arr.items().to_vec().into_iter();
    nest(arr.dims(), &mut items)
}

fn record_entries(record: &Record) -> Vec<(String, Value)> {
    record
        .iter()
        .map(|(member, value)| (member.name.clone(), value.clone()))
        .collect()
}

// ── Main Deserializer impl ─────────────────────────────────────────────────

impl<'de> de::Deserializer<'de> for Value {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self {
            Value::Nil => visitor.visit_unit(),
            Value::Bool(v) => visitor.visit_bool(v),
            Value::Int(v) => visitor.visit_i32(v),
            Value::Int64(v) => visitor.visit_i64(v),
            Value::Double(v) => visitor.visit_f64(v),
            Value::String(v) => visitor.visit_string(v),
            Value::Base64(v) => visitor.visit_byte_buf(v),
            Value::DateTime(dt) => visitor.visit_string(datetime::format_canonical(&dt)),
            Value::Array(items) => visitor.visit_seq(SeqDeserializer::new(items)),
            Value::MultiArray(arr) => multi_array_rows(&arr).deserialize_any(visitor),
            Value::Struct(s) => visitor.visit_map(MapDeserializer::new(s.into_iter().collect())),
            Value::Record(r) => visitor.visit_map(MapDeserializer::new(record_entries(&r))),
            // defined constants by name, anything else by number
            Value::Enum(e) => match e.name() {
                Some(name) => visitor.visit_string(name.to_owned()),
                None => visitor.visit_i64(e.value),
            },
            shared @ Value::Shared(_) => shared.detached()?.deserialize_any(visitor),
        }
    }

    /// `<nil/>` → `None`, anything else → `Some`
    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self {
            Value::Nil => visitor.visit_none(),
            shared @ Value::Shared(_) => shared.detached()?.deserialize_option(visitor),
            other => visitor.visit_some(other),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self {
            Value::Nil => visitor.visit_unit(),
            other => other.deserialize_any(visitor),
        }
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        self.deserialize_unit(visitor)
    }

    /// A newtype struct named with the dateTime token receives the
    /// canonical text of a `<dateTime.iso8601>` value.
    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        if name != crate::DATE_TIME_TOKEN {
            return visitor.visit_newtype_struct(self);
        }
        match self {
            Value::DateTime(dt) => visitor.visit_string(datetime::format_canonical(&dt)),
            Value::String(text) => visitor.visit_string(text),
            shared @ Value::Shared(_) => shared.detached()?.deserialize_newtype_struct(name, visitor),
            other => Err(de::Error::invalid_type(unexpected(&other), &visitor)),
        }
    }

    /// Base64 bytes also feed plain `Vec<u8>` sequences.
    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self {
            Value::Base64(bytes) => visitor.visit_seq(SeqDeserializer::new(
                bytes.into_iter().map(|b| Value::Int(i32::from(b))).collect(),
            )),
            other => other.deserialize_any(visitor),
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value> {
        self.deserialize_seq(visitor)
    }

    /// Unit variants come from strings or enum values; data-carrying
    /// variants from a single-member struct keyed by the variant name.
    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        match self {
            Value::String(variant) => visitor.visit_enum(EnumDeserializer {
                variant,
                value: None,
            }),
            Value::Enum(e) => {
                let variant = e.name().map(str::to_owned).ok_or_else(|| {
                    Error::InvalidEnumValue(format!(
                        "{} is not a defined value of {}",
                        e.value, e.schema.name
                    ))
                })?;
                visitor.visit_enum(EnumDeserializer {
                    variant,
                    value: None,
                })
            }
            Value::Struct(s) if s.len() == 1 => {
                let (variant, value) = s
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::Message("empty enum struct".into()))?;
                visitor.visit_enum(EnumDeserializer {
                    variant,
                    value: Some(value),
                })
            }
            shared @ Value::Shared(_) => shared.detached()?.deserialize_enum(name, variants, visitor),
            other => Err(de::Error::invalid_type(unexpected(&other), &visitor)),
        }
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        drop(self);
        visitor.visit_unit()
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf map struct identifier
    }
}

fn unexpected(value: &Value) -> de::Unexpected<'_> {
    match value {
        Value::Nil => de::Unexpected::Unit,
        Value::Bool(b) => de::Unexpected::Bool(*b),
        Value::Int(v) => de::Unexpected::Signed(i64::from(*v)),
        Value::Int64(v) => de::Unexpected::Signed(*v),
        Value::Double(v) => de::Unexpected::Float(*v),
        Value::String(s) => de::Unexpected::Str(s),
        Value::Base64(b) => de::Unexpected::Bytes(b),
        Value::DateTime(_) => de::Unexpected::Other("dateTime"),
        Value::Array(_) | Value::MultiArray(_) => de::Unexpected::Seq,
        Value::Struct(_) | Value::Record(_) => de::Unexpected::Map,
        Value::Enum(_) => de::Unexpected::Other("enum value"),
        Value::Shared(_) => de::Unexpected::Other("shared value"),
    }
}

// ── SeqDeserializer ────────────────────────────────────────────────────────

struct SeqDeserializer {
    iter: vec::IntoIter<Value>,
}

impl SeqDeserializer {
    fn new(items: Vec<Value>) -> Self {
        SeqDeserializer {
            iter: items.into_iter(),
        }
    }
}

impl<'de> SeqAccess<'de> for SeqDeserializer {
    type Error = Error;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>> {
        match self.iter.next() {
            Some(value) => seed.deserialize(value).map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

// ── MapDeserializer ────────────────────────────────────────────────────────

struct MapDeserializer {
    iter: vec::IntoIter<(String, Value)>,
    value: Option<Value>,
}

impl MapDeserializer {
    fn new(entries: Vec<(String, Value)>) -> Self {
        MapDeserializer {
            iter: entries.into_iter(),
            value: None,
        }
    }
}

impl<'de> MapAccess<'de> for MapDeserializer {
    type Error = Error;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        match self.iter.next() {
            Some((key, value)) => {
                self.value = Some(value);
                seed.deserialize(key_deserializer(key)).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        let value = self
            .value
            .take()
            .ok_or_else(|| Error::Message("next_value_seed called before next_key_seed".into()))?;
        seed.deserialize(value)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

// ── EnumDeserializer ───────────────────────────────────────────────────────

struct EnumDeserializer {
    variant: String,
    value: Option<Value>,
}

impl<'de> EnumAccess<'de> for EnumDeserializer {
    type Error = Error;
    type Variant = VariantDeserializer;

    fn variant_seed<V: DeserializeSeed<'de>>(self, seed: V) -> Result<(V::Value, Self::Variant)> {
        let variant = seed.deserialize(key_deserializer(self.variant))?;
        Ok((variant, VariantDeserializer { value: self.value }))
    }
}

struct VariantDeserializer {
    value: Option<Value>,
}

impl<'de> VariantAccess<'de> for VariantDeserializer {
    type Error = Error;

    fn unit_variant(self) -> Result<()> {
        match self.value {
            None | Some(Value::Nil) => Ok(()),
            Some(other) => Err(de::Error::invalid_type(unexpected(&other), &"unit variant")),
        }
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value> {
        match self.value {
            Some(value) => seed.deserialize(value),
            None => Err(de::Error::invalid_type(de::Unexpected::UnitVariant, &"newtype variant")),
        }
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value> {
        match self.value {
            Some(value) => de::Deserializer::deserialize_seq(value, visitor),
            None => Err(de::Error::invalid_type(de::Unexpected::UnitVariant, &"tuple variant")),
        }
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        match self.value {
            Some(value) => de::Deserializer::deserialize_any(value, visitor),
            None => Err(de::Error::invalid_type(de::Unexpected::UnitVariant, &"struct variant")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Struct;

    #[test]
    fn test_multi_array_rows() {
        let arr = MultiArray::new(vec![2, 3], (1..=6).map(Value::Int).collect()).unwrap();
        let rows: Vec<Vec<i32>> = from_value(Value::MultiArray(arr)).unwrap();
        assert_eq!(rows, vec![vec![1, 2, 3], vec![4, 5, 6]]);
    }

    #[test]
    fn test_base64_feeds_byte_vec() {
        let bytes: Vec<u8> = from_value(Value::Base64(vec![1, 2, 255])).unwrap();
        assert_eq!(bytes, [1, 2, 255]);
    }

    #[test]
    fn test_integer_range_checked() {
        assert_eq!(from_value::<u8>(Value::Int(200)).unwrap(), 200);
        assert!(from_value::<u8>(Value::Int(300)).is_err());
        assert_eq!(from_value::<u32>(Value::Int64(4294967295)).unwrap(), u32::MAX);
    }

    #[test]
    fn test_struct_into_map() {
        let mut s = Struct::new();
        s.insert("a", 1);
        s.insert("b", 2);
        let map: std::collections::BTreeMap<String, i64> = from_value(Value::Struct(s)).unwrap();
        assert_eq!(map["a"], 1);
        assert_eq!(map["b"], 2);
    }
}
