//! # Atomic Value Codec
//!
//! Typed leaf values and the descriptors used to decode them from untyped bytes.
//!
//! Every value has a [`ValueKind`] descriptor. A kind either has a fixed encoded
//! size (integers, floats, booleans) or is variable-sized (bytes, text, lists,
//! maps, records with a variable member). Variable-sized values are always written
//! behind a 4-byte length prefix, so a reader that knows the kind can find the end
//! of every value without scanning.
//!
//! ## Wire Format
//! ```text
//! fixed:     [raw (fixed_size bytes, little-endian)]
//! variable:  [length: u32 LE] [raw (length bytes)]
//!
//! text raw   = UTF-8 bytes
//! list raw   = written element 0, written element 1, ...
//! map raw    = written key 0, written value 0, written key 1, ...
//! record raw = written field 0, written field 1, ...
//! ```
//!
//! A plain `bool` occupies one byte with the value in the most significant bit
//! (`0x80` / `0x00`); [`Flags`] packs eight booleans into the same byte.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use crate::error::{constants, ProtocolError, Result};

/// Size of the length prefix written before every variable-sized value
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Descriptor of an atomic (or composite) value: its fixed size, if any, and how
/// to decode it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Flags,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    Bytes,
    Text,
    /// Homogeneous sequence of the inner kind.
    List(Box<ValueKind>),
    /// Ordered key/value pairs.
    Map(Box<ValueKind>, Box<ValueKind>),
    /// Nested reducer, described by its field layout.
    Record(Vec<ValueKind>),
}

impl ValueKind {
    /// Convenience constructor for `List`.
    pub fn list(element: ValueKind) -> Self {
        ValueKind::List(Box::new(element))
    }

    /// Convenience constructor for `Map`.
    pub fn map(key: ValueKind, value: ValueKind) -> Self {
        ValueKind::Map(Box::new(key), Box::new(value))
    }

    /// Encoded size in bytes when it never varies, `None` for variable-sized kinds.
    ///
    /// A record is fixed-size only when all of its fields are.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            ValueKind::Bool | ValueKind::Flags | ValueKind::U8 | ValueKind::I8 => Some(1),
            ValueKind::U16 | ValueKind::I16 => Some(2),
            ValueKind::U32 | ValueKind::I32 | ValueKind::F32 => Some(4),
            ValueKind::U64 | ValueKind::I64 | ValueKind::F64 => Some(8),
            ValueKind::Bytes | ValueKind::Text | ValueKind::List(_) | ValueKind::Map(..) => None,
            ValueKind::Record(layout) => layout.iter().map(ValueKind::fixed_size).sum(),
        }
    }

    /// Short human-readable name, used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Bool => "bool",
            ValueKind::Flags => "flags",
            ValueKind::U8 => "u8",
            ValueKind::I8 => "i8",
            ValueKind::U16 => "u16",
            ValueKind::I16 => "i16",
            ValueKind::U32 => "u32",
            ValueKind::I32 => "i32",
            ValueKind::U64 => "u64",
            ValueKind::I64 => "i64",
            ValueKind::F32 => "f32",
            ValueKind::F64 => "f64",
            ValueKind::Bytes => "bytes",
            ValueKind::Text => "text",
            ValueKind::List(_) => "list",
            ValueKind::Map(..) => "map",
            ValueKind::Record(_) => "record",
        }
    }

    /// Decode a raw byte run (without its length prefix) into a value of this kind.
    ///
    /// # Errors
    /// - `Truncated` if a fixed-size kind gets fewer bytes than it needs
    /// - `TrailingBytes` if the run is longer than the kind accounts for
    /// - `InvalidUtf8` for malformed text
    pub fn decode(&self, raw: &[u8]) -> Result<Value> {
        if let Some(size) = self.fixed_size() {
            if raw.len() < size {
                return Err(ProtocolError::Truncated {
                    needed: size,
                    available: raw.len(),
                });
            }
            if raw.len() > size {
                return Err(ProtocolError::TrailingBytes(raw.len() - size));
            }
        }

        let value = match self {
            ValueKind::Bool => Value::Bool(raw[0] & 0x80 != 0),
            ValueKind::Flags => Value::Flags(Flags::from_bits(raw[0])),
            ValueKind::U8 => Value::U8(raw[0]),
            ValueKind::I8 => Value::I8(raw[0] as i8),
            ValueKind::U16 => Value::U16(u16::from_le_bytes([raw[0], raw[1]])),
            ValueKind::I16 => Value::I16(i16::from_le_bytes([raw[0], raw[1]])),
            ValueKind::U32 => Value::U32(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
            ValueKind::I32 => Value::I32(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
            ValueKind::F32 => Value::F32(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])),
            ValueKind::U64 => Value::U64(u64::from_le_bytes(eight(raw))),
            ValueKind::I64 => Value::I64(i64::from_le_bytes(eight(raw))),
            ValueKind::F64 => Value::F64(f64::from_le_bytes(eight(raw))),
            ValueKind::Bytes => Value::Bytes(raw.to_vec()),
            ValueKind::Text => Value::Text(
                String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)?,
            ),
            ValueKind::List(element) => {
                require_sized(element)?;
                let mut cursor = Bytes::copy_from_slice(raw);
                let mut items = Vec::new();
                while cursor.has_remaining() {
                    items.push(read_value(element, &mut cursor)?);
                }
                Value::List {
                    element: (**element).clone(),
                    items,
                }
            }
            ValueKind::Map(key, value) => {
                require_sized(key)?;
                require_sized(value)?;
                let mut cursor = Bytes::copy_from_slice(raw);
                let mut entries = Vec::new();
                while cursor.has_remaining() {
                    let k = read_value(key, &mut cursor)?;
                    let v = read_value(value, &mut cursor)?;
                    entries.push((k, v));
                }
                Value::Map {
                    key: (**key).clone(),
                    value: (**value).clone(),
                    entries,
                }
            }
            ValueKind::Record(layout) => {
                let mut cursor = Bytes::copy_from_slice(raw);
                let fields = layout
                    .iter()
                    .map(|kind| read_value(kind, &mut cursor))
                    .collect::<Result<Vec<_>>>()?;
                if cursor.has_remaining() {
                    return Err(ProtocolError::TrailingBytes(cursor.remaining()));
                }
                Value::Record(fields)
            }
        };
        Ok(value)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::List(element) => write!(f, "list<{element}>"),
            ValueKind::Map(k, v) => write!(f, "map<{k}, {v}>"),
            ValueKind::Record(layout) => write!(f, "record[{}]", layout.len()),
            other => f.write_str(other.name()),
        }
    }
}

/// List and map bodies are read until exhausted, so every entry must take at
/// least one byte.
fn require_sized(kind: &ValueKind) -> Result<()> {
    if kind.fixed_size() == Some(0) {
        return Err(ProtocolError::Configuration(format!(
            "{}: {kind}",
            constants::ERR_ZERO_SIZE_ELEMENT
        )));
    }
    Ok(())
}

fn eight(raw: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&raw[..8]);
    out
}

/// Eight booleans packed into one byte. Flag 0 is the most significant bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u8);

impl Flags {
    pub fn new(flags: [bool; 8]) -> Self {
        let mut out = Flags(0);
        for (index, flag) in flags.into_iter().enumerate() {
            out.set(index, flag);
        }
        out
    }

    pub fn from_bits(bits: u8) -> Self {
        Flags(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Flag at `index` (0..8). Out-of-range indices read as `false`.
    pub fn get(self, index: usize) -> bool {
        index < 8 && self.0 & (0x80 >> index) != 0
    }

    /// Set the flag at `index` (0..8). Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize, value: bool) {
        if index >= 8 {
            return;
        }
        if value {
            self.0 |= 0x80 >> index;
        } else {
            self.0 &= !(0x80 >> index);
        }
    }

    pub fn to_array(self) -> [bool; 8] {
        std::array::from_fn(|index| self.get(index))
    }
}

/// A decoded (or to-be-encoded) typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Flags(Flags),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Bytes(Vec<u8>),
    Text(String),
    List {
        element: ValueKind,
        items: Vec<Value>,
    },
    Map {
        key: ValueKind,
        value: ValueKind,
        entries: Vec<(Value, Value)>,
    },
    Record(Vec<Value>),
}

impl Value {
    pub fn list(element: ValueKind, items: Vec<Value>) -> Self {
        Value::List { element, items }
    }

    pub fn map(key: ValueKind, value: ValueKind, entries: Vec<(Value, Value)>) -> Self {
        Value::Map {
            key,
            value,
            entries,
        }
    }

    /// The descriptor this value is written and read with.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Flags(_) => ValueKind::Flags,
            Value::U8(_) => ValueKind::U8,
            Value::I8(_) => ValueKind::I8,
            Value::U16(_) => ValueKind::U16,
            Value::I16(_) => ValueKind::I16,
            Value::U32(_) => ValueKind::U32,
            Value::I32(_) => ValueKind::I32,
            Value::U64(_) => ValueKind::U64,
            Value::I64(_) => ValueKind::I64,
            Value::F32(_) => ValueKind::F32,
            Value::F64(_) => ValueKind::F64,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Text(_) => ValueKind::Text,
            Value::List { element, .. } => ValueKind::list(element.clone()),
            Value::Map { key, value, .. } => ValueKind::map(key.clone(), value.clone()),
            Value::Record(fields) => ValueKind::Record(fields.iter().map(Value::kind).collect()),
        }
    }

    /// Raw encoding without the length prefix.
    ///
    /// # Errors
    /// `Configuration` when a list or map holds an element of the wrong kind, or
    /// when a nested variable-sized value does not fit a 4-byte length.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = BytesMut::new();
        match self {
            Value::Bool(b) => out.put_u8(if *b { 0x80 } else { 0x00 }),
            Value::Flags(flags) => out.put_u8(flags.bits()),
            Value::U8(v) => out.put_u8(*v),
            Value::I8(v) => out.put_i8(*v),
            Value::U16(v) => out.put_u16_le(*v),
            Value::I16(v) => out.put_i16_le(*v),
            Value::U32(v) => out.put_u32_le(*v),
            Value::I32(v) => out.put_i32_le(*v),
            Value::U64(v) => out.put_u64_le(*v),
            Value::I64(v) => out.put_i64_le(*v),
            Value::F32(v) => out.put_f32_le(*v),
            Value::F64(v) => out.put_f64_le(*v),
            Value::Bytes(bytes) => out.put_slice(bytes),
            Value::Text(text) => out.put_slice(text.as_bytes()),
            Value::List { element, items } => {
                require_sized(element)?;
                for (index, item) in items.iter().enumerate() {
                    check_kind(index, element, item)?;
                    write_value(item, &mut out)?;
                }
            }
            Value::Map {
                key,
                value,
                entries,
            } => {
                require_sized(key)?;
                require_sized(value)?;
                for (index, (k, v)) in entries.iter().enumerate() {
                    check_kind(index, key, k)?;
                    check_kind(index, value, v)?;
                    write_value(k, &mut out)?;
                    write_value(v, &mut out)?;
                }
            }
            Value::Record(fields) => {
                for field in fields {
                    write_value(field, &mut out)?;
                }
            }
        }
        Ok(out.to_vec())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

fn check_kind(index: usize, expected: &ValueKind, value: &Value) -> Result<()> {
    let found = value.kind();
    if &found != expected {
        return Err(ProtocolError::Configuration(format!(
            "element {index} is {found}, collection declares {expected}"
        )));
    }
    Ok(())
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    Flags => Flags,
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    Vec<u8> => Bytes,
    String => Text,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// Append a value in written form (length prefix included when variable-sized).
///
/// # Errors
/// `Configuration` when a fixed-size value encodes to the wrong number of bytes
/// or a variable-sized value exceeds `u32::MAX` bytes.
pub fn write_value(value: &Value, out: &mut BytesMut) -> Result<()> {
    let raw = value.encode()?;
    match value.kind().fixed_size() {
        Some(size) if size != raw.len() => {
            return Err(ProtocolError::Configuration(
                constants::ERR_FIXED_SIZE_MISMATCH.to_string(),
            ));
        }
        Some(_) => {}
        None => put_length(out, raw.len())?,
    }
    out.put_slice(&raw);
    Ok(())
}

/// Read one value in written form from the front of `buf`.
///
/// Never consumes more than the value's fixed size or declared length.
pub fn read_value(kind: &ValueKind, buf: &mut Bytes) -> Result<Value> {
    let raw = match kind.fixed_size() {
        Some(size) => take(buf, size)?,
        None => {
            let len = take_length(buf)?;
            take(buf, len)?
        }
    };
    kind.decode(&raw)
}

pub(crate) fn put_length(out: &mut BytesMut, len: usize) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| ProtocolError::Configuration(constants::ERR_LENGTH_OVERFLOW.to_string()))?;
    out.put_u32_le(len);
    Ok(())
}

pub(crate) fn take_length(buf: &mut Bytes) -> Result<usize> {
    let raw = take(buf, LENGTH_PREFIX_SIZE)?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize)
}

pub(crate) fn take(buf: &mut Bytes, needed: usize) -> Result<Bytes> {
    if buf.remaining() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            available: buf.remaining(),
        });
    }
    Ok(buf.split_to(needed))
}
