//! Host-side dynamic value passed into and returned from dispatched calls.
//!
//! [`HostValue`] keeps the exact width of every scalar so a conversion to the
//! runtime never has to guess: an `I64` becomes a runtime `Long`, never an
//! `Int`. The unsigned variants exist because Rust callers have them, but the
//! runtime has no matching tags and refuses them.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Host representation of a boundary value.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum HostValue {
    /// Explicit null marker (distinct from "no value").
    #[default]
    Null,
    Bool(bool),
    U8(u8),
    I16(i16),
    I32(i32),
    I64(i64),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<HostValue>),
    /// Uses IndexMap so insertion order survives a round trip.
    Map(IndexMap<String, HostValue>),
}

impl HostValue {
    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Null => "null",
            HostValue::Bool(_) => "bool",
            HostValue::U8(_) => "u8",
            HostValue::I16(_) => "i16",
            HostValue::I32(_) => "i32",
            HostValue::I64(_) => "i64",
            HostValue::U16(_) => "u16",
            HostValue::U32(_) => "u32",
            HostValue::U64(_) => "u64",
            HostValue::F32(_) => "f32",
            HostValue::F64(_) => "f64",
            HostValue::Str(_) => "string",
            HostValue::Bytes(_) => "bytes",
            HostValue::List(_) => "list",
            HostValue::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[HostValue]> {
        match self {
            HostValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, HostValue>> {
        match self {
            HostValue::Map(map) => Some(map),
            _ => None,
        }
    }
}

macro_rules! host_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for HostValue {
                fn from(value: $ty) -> Self {
                    HostValue::$variant(value)
                }
            }

            impl TryFrom<HostValue> for $ty {
                type Error = HostValue;

                fn try_from(value: HostValue) -> Result<Self, Self::Error> {
                    match value {
                        HostValue::$variant(inner) => Ok(inner),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

host_scalar! {
    bool => Bool,
    u8 => U8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => Str,
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::Str(value.to_owned())
    }
}

impl<T: Into<HostValue>> From<Vec<T>> for HostValue {
    fn from(items: Vec<T>) -> Self {
        HostValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<HostValue>, const N: usize> From<[T; N]> for HostValue {
    fn from(items: [T; N]) -> Self {
        HostValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(HostValue::Null, Into::into)
    }
}

impl<T: Into<HostValue>> From<IndexMap<String, T>> for HostValue {
    fn from(map: IndexMap<String, T>) -> Self {
        HostValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<HostValue>> From<HashMap<String, T>> for HostValue {
    fn from(map: HashMap<String, T>) -> Self {
        HostValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<HostValue>> From<BTreeMap<String, T>> for HostValue {
    fn from(map: BTreeMap<String, T>) -> Self {
        HostValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

// Hand-written so every width keeps its own serde primitive.
impl Serialize for HostValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            HostValue::Null => serializer.serialize_none(),
            HostValue::Bool(b) => serializer.serialize_bool(*b),
            HostValue::U8(n) => serializer.serialize_u8(*n),
            HostValue::I16(n) => serializer.serialize_i16(*n),
            HostValue::I32(n) => serializer.serialize_i32(*n),
            HostValue::I64(n) => serializer.serialize_i64(*n),
            HostValue::U16(n) => serializer.serialize_u16(*n),
            HostValue::U32(n) => serializer.serialize_u32(*n),
            HostValue::U64(n) => serializer.serialize_u64(*n),
            HostValue::F32(n) => serializer.serialize_f32(*n),
            HostValue::F64(n) => serializer.serialize_f64(*n),
            HostValue::Str(s) => serializer.serialize_str(s),
            HostValue::Bytes(bytes) => serializer.serialize_bytes(bytes),
            HostValue::List(items) => items.serialize(serializer),
            HostValue::Map(map) => map.serialize(serializer),
        }
    }
}

// Self-describing formats only report i64/u64/f64, so integers land in the
// widest signed slot that holds them.
impl<'de> Deserialize<'de> for HostValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct HostValueVisitor;

        impl<'de> Visitor<'de> for HostValueVisitor {
            type Value = HostValue;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a null, bool, number, string, bytes, sequence or map")
            }

            fn visit_bool<E>(self, value: bool) -> Result<Self::Value, E> {
                Ok(HostValue::Bool(value))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E> {
                Ok(HostValue::I64(value))
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E> {
                match i64::try_from(value) {
                    Ok(signed) => Ok(HostValue::I64(signed)),
                    Err(_) => Ok(HostValue::U64(value)),
                }
            }

            fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E> {
                Ok(HostValue::F64(value))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E> {
                Ok(HostValue::Str(value.to_owned()))
            }

            fn visit_string<E>(self, value: String) -> Result<Self::Value, E> {
                Ok(HostValue::Str(value))
            }

            fn visit_bytes<E>(self, value: &[u8]) -> Result<Self::Value, E> {
                Ok(HostValue::Bytes(value.to_vec()))
            }

            fn visit_byte_buf<E>(self, value: Vec<u8>) -> Result<Self::Value, E> {
                Ok(HostValue::Bytes(value))
            }

            fn visit_none<E>(self) -> Result<Self::Value, E> {
                Ok(HostValue::Null)
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(HostValue::Null)
            }

            fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                HostValue::deserialize(deserializer)
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(item) = seq.next_element()? {
                    items.push(item);
                }
                Ok(HostValue::List(items))
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: de::MapAccess<'de>,
            {
                let mut entries = IndexMap::new();
                while let Some((key, value)) = map.next_entry::<String, HostValue>()? {
                    entries.insert(key, value);
                }
                Ok(HostValue::Map(entries))
            }
        }

        deserializer.deserialize_any(HostValueVisitor)
    }
}
