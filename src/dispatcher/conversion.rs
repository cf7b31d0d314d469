//! Conversion between [`HostValue`] and the runtime's tagged [`Value`].
//!
//! Scalars map one-to-one by tag and are never narrowed. Composites convert
//! element by element. Two flavours exist for the host -> runtime direction:
//! the strict one reports unsupported input as an error (used for call
//! arguments so the caller learns about it), the total one fails closed by
//! substituting `Null` (used for callback results handed back to the
//! runtime, where nobody could receive an error).

use super::error::{Direction, MarshalError};
use super::host_value::HostValue;
use super::value::Value;
use indexmap::IndexMap;

/// Default maximum nesting depth for composite values.
pub const MAX_VALUE_DEPTH: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Strict,
    Total,
}

/// Stateless converter carrying the nesting limit.
#[derive(Clone, Copy, Debug)]
pub struct Marshaler {
    max_depth: usize,
}

impl Default for Marshaler {
    fn default() -> Self {
        Self::new(MAX_VALUE_DEPTH)
    }
}

impl Marshaler {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Convert a host value, failing on anything without an exact runtime tag.
    pub fn try_to_runtime(&self, value: HostValue) -> Result<Value, MarshalError> {
        self.lower(value, 0, Mode::Strict)
    }

    /// Convert a host value, substituting `Null` for anything unsupported.
    pub fn to_runtime(&self, value: HostValue) -> Value {
        match self.lower(value, 0, Mode::Total) {
            Ok(value) => value,
            // Total mode never reports errors.
            Err(_) => Value::Null,
        }
    }

    /// Convert a runtime value for the host. Unknown tags become `Null`.
    pub fn to_host(&self, value: Value) -> HostValue {
        self.raise(value, 0)
    }

    fn unsupported(mode: Mode, kind: &str) -> Result<Value, MarshalError> {
        match mode {
            Mode::Strict => Err(MarshalError::Unsupported {
                direction: Direction::ToRuntime,
                kind: kind.to_string(),
            }),
            Mode::Total => {
                tracing::warn!("no runtime type for host {kind}; passing null instead");
                Ok(Value::Null)
            }
        }
    }

    fn lower(&self, value: HostValue, depth: usize, mode: Mode) -> Result<Value, MarshalError> {
        if depth > self.max_depth {
            return match mode {
                Mode::Strict => Err(MarshalError::DepthExceeded {
                    max: self.max_depth,
                }),
                Mode::Total => {
                    tracing::warn!(max = self.max_depth, "host value nested too deep; truncated to null");
                    Ok(Value::Null)
                }
            };
        }

        let lowered = match value {
            HostValue::Null => Value::Null,
            HostValue::Bool(b) => Value::Bool(b),
            HostValue::U8(n) => Value::Char(n),
            HostValue::I16(n) => Value::Short(n),
            HostValue::I32(n) => Value::Int(n),
            HostValue::I64(n) => Value::Long(n),
            HostValue::F32(n) => Value::Float(n),
            HostValue::F64(n) => Value::Double(n),
            HostValue::Str(s) => Value::String(s),
            HostValue::Bytes(bytes) => Value::Buffer(bytes),
            HostValue::List(items) => {
                let mut array = Vec::with_capacity(items.len());
                for item in items {
                    array.push(self.lower(item, depth + 1, mode)?);
                }
                Value::Array(array)
            }
            HostValue::Map(map) => {
                let mut pairs = Vec::with_capacity(map.len());
                for (key, item) in map {
                    pairs.push((Value::String(key), self.lower(item, depth + 1, mode)?));
                }
                Value::Map(pairs)
            }
            other @ (HostValue::U16(_) | HostValue::U32(_) | HostValue::U64(_)) => {
                return Self::unsupported(mode, other.type_name());
            }
        };

        Ok(lowered)
    }

    fn raise(&self, value: Value, depth: usize) -> HostValue {
        if depth > self.max_depth {
            tracing::warn!(max = self.max_depth, "runtime value nested too deep; truncated to null");
            return HostValue::Null;
        }

        match value {
            Value::Null => HostValue::Null,
            Value::Bool(b) => HostValue::Bool(b),
            Value::Char(n) => HostValue::U8(n),
            Value::Short(n) => HostValue::I16(n),
            Value::Int(n) => HostValue::I32(n),
            Value::Long(n) => HostValue::I64(n),
            Value::Float(n) => HostValue::F32(n),
            Value::Double(n) => HostValue::F64(n),
            Value::String(s) => HostValue::Str(s),
            Value::Buffer(bytes) => HostValue::Bytes(bytes),
            Value::Array(items) => HostValue::List(
                items
                    .into_iter()
                    .map(|item| self.raise(item, depth + 1))
                    .collect(),
            ),
            Value::Map(pairs) => {
                let mut map = IndexMap::with_capacity(pairs.len());
                for (key, item) in pairs {
                    let Some(key_str) = key.key_string() else {
                        tracing::warn!(kind = %key.kind(), "dropping map entry with non-stringifiable key");
                        continue;
                    };
                    let item = self.raise(item, depth + 1);
                    if map.insert(key_str.clone(), item).is_some() {
                        tracing::warn!(key = %key_str, "duplicate map key from runtime; keeping last value");
                    }
                }
                HostValue::Map(map)
            }
            other @ (Value::Pointer(_) | Value::Function(_)) => {
                let err = MarshalError::Unsupported {
                    direction: Direction::ToHost,
                    kind: other.kind().to_string(),
                };
                tracing::warn!("{err}; returning null");
                HostValue::Null
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::engine::FunctionRef;

    fn round_trip(value: HostValue) -> HostValue {
        let marshaler = Marshaler::default();
        let lowered = marshaler.try_to_runtime(value).unwrap();
        marshaler.to_host(lowered)
    }

    #[test]
    fn test_scalar_round_trip_extremes() {
        let cases = vec![
            HostValue::Null,
            HostValue::Bool(true),
            HostValue::Bool(false),
            HostValue::U8(0),
            HostValue::U8(127),
            HostValue::U8(255),
            HostValue::I16(i16::MIN),
            HostValue::I16(0),
            HostValue::I16(i16::MAX),
            HostValue::I32(-2147483648),
            HostValue::I32(0),
            HostValue::I32(2147483647),
            HostValue::I64(i64::MIN),
            HostValue::I64(i64::MAX),
            HostValue::F32(1.2e-38),
            HostValue::F32(3.4e38),
            HostValue::F64(2.3e-308),
            HostValue::F64(1.7e308),
            HostValue::F64(f64::MIN_POSITIVE),
            HostValue::F64(f64::MAX),
            HostValue::Str("hello".to_string()),
            HostValue::Bytes(vec![0, b'a', 0, 255]),
        ];

        for value in cases {
            assert_eq!(round_trip(value.clone()), value);
        }
    }

    #[test]
    fn test_scalars_keep_their_tag() {
        let marshaler = Marshaler::default();
        assert_eq!(marshaler.try_to_runtime(HostValue::U8(1)), Ok(Value::Char(1)));
        assert_eq!(marshaler.try_to_runtime(HostValue::I16(1)), Ok(Value::Short(1)));
        assert_eq!(marshaler.try_to_runtime(HostValue::I32(1)), Ok(Value::Int(1)));
        assert_eq!(marshaler.try_to_runtime(HostValue::I64(1)), Ok(Value::Long(1)));
        assert_eq!(marshaler.try_to_runtime(HostValue::F32(1.0)), Ok(Value::Float(1.0)));
        assert_eq!(marshaler.try_to_runtime(HostValue::F64(1.0)), Ok(Value::Double(1.0)));
    }

    #[test]
    fn test_array_round_trip() {
        let value = HostValue::List(vec![HostValue::U8(1), HostValue::I16(2), HostValue::I64(3)]);
        let back = round_trip(value.clone());
        assert_eq!(back.as_list().map(<[HostValue]>::len), Some(3));
        assert_eq!(back, value);
    }

    #[test]
    fn test_map_round_trip() {
        let mut map = IndexMap::new();
        map.insert("1".to_string(), HostValue::I32(1));
        map.insert("2".to_string(), HostValue::Bool(true));
        map.insert("3".to_string(), HostValue::Str("sss".to_string()));

        let back = round_trip(HostValue::Map(map.clone()));
        let back = back.as_map().unwrap();
        assert_eq!(back.len(), map.len());
        for (key, value) in &map {
            assert_eq!(back.get(key), Some(value));
        }
    }

    #[test]
    fn test_unsigned_rejected_strict() {
        let marshaler = Marshaler::default();
        let err = marshaler.try_to_runtime(HostValue::U64(1)).unwrap_err();
        assert_eq!(
            err,
            MarshalError::Unsupported {
                direction: Direction::ToRuntime,
                kind: "u64".to_string()
            }
        );

        let nested = HostValue::List(vec![HostValue::I32(1), HostValue::U32(2)]);
        assert!(marshaler.try_to_runtime(nested).is_err());
    }

    #[test]
    fn test_unsigned_fails_closed_total() {
        let marshaler = Marshaler::default();
        assert_eq!(marshaler.to_runtime(HostValue::U16(9)), Value::Null);

        let nested = HostValue::List(vec![HostValue::I32(1), HostValue::U32(2)]);
        assert_eq!(
            marshaler.to_runtime(nested),
            Value::Array(vec![Value::Int(1), Value::Null])
        );
    }

    #[test]
    fn test_unknown_runtime_tags_become_null() {
        let marshaler = Marshaler::default();
        assert_eq!(marshaler.to_host(Value::Pointer(0x1000)), HostValue::Null);
        assert_eq!(
            marshaler.to_host(Value::Array(vec![Value::Function(FunctionRef(3)), Value::Int(4)])),
            HostValue::List(vec![HostValue::Null, HostValue::I32(4)])
        );
    }

    #[test]
    fn test_runtime_map_keys_stringified() {
        let marshaler = Marshaler::default();
        let value = Value::Map(vec![
            (Value::Int(1), Value::Bool(true)),
            (Value::String("two".into()), Value::Short(2)),
            (Value::Double(3.0), Value::Null),
            (Value::Char(b'k'), Value::Int(7)),
            (Value::Array(vec![]), Value::Int(8)),
            (Value::Long(1), Value::Bool(false)),
        ]);

        let host = marshaler.to_host(value);
        let map = host.as_map().unwrap();
        assert_eq!(map.len(), 4);
        assert_eq!(map["1"], HostValue::Bool(false));
        assert_eq!(map["two"], HostValue::I16(2));
        assert_eq!(map["3.000000"], HostValue::Null);
        assert_eq!(map["k"], HostValue::I32(7));
    }

    #[test]
    fn test_depth_limit() {
        let marshaler = Marshaler::new(3);

        let mut value = HostValue::I32(0);
        for _ in 0..5 {
            value = HostValue::List(vec![value]);
        }

        assert_eq!(
            marshaler.try_to_runtime(value.clone()),
            Err(MarshalError::DepthExceeded { max: 3 })
        );
        assert!(matches!(marshaler.to_runtime(value), Value::Array(_)));
    }
}
