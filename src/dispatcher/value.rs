//! Tagged value representation exchanged with the runtime.
//!
//! Every datum that crosses the host/runtime boundary travels as a [`Value`].
//! Values are owned: marshaling consumes its input, the runtime only borrows
//! argument slices, and dropping a `Value` is its destruction, so each one is
//! released exactly once by whichever side read it last.

use super::engine::FunctionRef;
use std::fmt;

/// Tagged union understood by the runtime.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Char(u8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    /// Length-carrying byte buffer; embedded NULs are preserved.
    Buffer(Vec<u8>),
    Array(Vec<Value>),
    /// Ordered key/value pairs. Keys are expected to stringify uniquely.
    Map(Vec<(Value, Value)>),
    /// Raw runtime pointer. Has no host representation.
    Pointer(usize),
    /// Runtime function reference. Has no host representation.
    Function(FunctionRef),
}

/// Type tag of a [`Value`], used in diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    Buffer,
    Array,
    Map,
    Pointer,
    Function,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Char(_) => ValueKind::Char,
            Value::Short(_) => ValueKind::Short,
            Value::Int(_) => ValueKind::Int,
            Value::Long(_) => ValueKind::Long,
            Value::Float(_) => ValueKind::Float,
            Value::Double(_) => ValueKind::Double,
            Value::String(_) => ValueKind::String,
            Value::Buffer(_) => ValueKind::Buffer,
            Value::Array(_) => ValueKind::Array,
            Value::Map(_) => ValueKind::Map,
            Value::Pointer(_) => ValueKind::Pointer,
            Value::Function(_) => ValueKind::Function,
        }
    }

    /// Render a map key the way the host sees it.
    ///
    /// Scalars use the runtime's own stringify formats: chars as the
    /// character, floats with six decimals (`f` suffix for single
    /// precision), buffers as lowercase hex. Null, composites, pointers
    /// and functions have no key form.
    pub fn key_string(&self) -> Option<String> {
        match self {
            Value::Bool(b) => Some(b.to_string()),
            Value::Char(c) => Some(char::from(*c).to_string()),
            Value::Short(n) => Some(n.to_string()),
            Value::Int(n) => Some(n.to_string()),
            Value::Long(n) => Some(n.to_string()),
            Value::Float(n) => Some(format!("{n:.6}f")),
            Value::Double(n) => Some(format!("{n:.6}")),
            Value::String(s) => Some(s.clone()),
            Value::Buffer(bytes) => Some(bytes.iter().map(|b| format!("{b:02x}")).collect()),
            Value::Null | Value::Array(_) | Value::Map(_) | Value::Pointer(_) | Value::Function(_) => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Char => "char",
            ValueKind::Short => "short",
            ValueKind::Int => "int",
            ValueKind::Long => "long",
            ValueKind::Float => "float",
            ValueKind::Double => "double",
            ValueKind::String => "string",
            ValueKind::Buffer => "buffer",
            ValueKind::Array => "array",
            ValueKind::Map => "map",
            ValueKind::Pointer => "pointer",
            ValueKind::Function => "function",
        };
        f.write_str(name)
    }
}
