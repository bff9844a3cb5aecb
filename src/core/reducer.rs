//! # Reducers
//!
//! A reducer is an ordered composite: a declared field layout plus a factory that
//! rebuilds an instance from decoded field values. It is the only contract a type
//! must satisfy to travel as a packet or as a nested record.
//!
//! Fields are written in layout order and must be read back in the same order.
//!
//! ```rust
//! use wirekit::core::reducer::{Fields, Layout, Reducer};
//! use wirekit::core::value::{Value, ValueKind};
//! use wirekit::error::Result;
//!
//! #[derive(Debug, PartialEq)]
//! struct Point { x: i32, y: i32 }
//!
//! impl Reducer for Point {
//!     fn format() -> Layout {
//!         vec![ValueKind::I32, ValueKind::I32]
//!     }
//!     fn to_fields(&self) -> Vec<Value> {
//!         vec![self.x.into(), self.y.into()]
//!     }
//!     fn from_fields(mut fields: Fields) -> Result<Self> {
//!         Ok(Point { x: fields.i32()?, y: fields.i32()? })
//!     }
//! }
//! ```

use crate::core::value::{Flags, Value, ValueKind};
use crate::error::{ProtocolError, Result};

/// Ordered field descriptors of a reducer.
pub type Layout = Vec<ValueKind>;

/// Ordered composite with a fixed field layout.
pub trait Reducer: Sized {
    /// The field layout. Must return the same layout on every call.
    fn format() -> Layout;

    /// Field values in layout order.
    fn to_fields(&self) -> Vec<Value>;

    /// Rebuild an instance from decoded fields, consumed in layout order.
    fn from_fields(fields: Fields) -> Result<Self>;
}

impl ValueKind {
    /// Kind of a nested reducer field.
    pub fn record<R: Reducer>() -> Self {
        ValueKind::Record(R::format())
    }
}

impl Value {
    /// Wrap a reducer as a nested record value.
    pub fn record<R: Reducer>(reducer: &R) -> Self {
        Value::Record(reducer.to_fields())
    }
}

/// Check produced values against a layout before they are written.
///
/// # Errors
/// `Configuration` on a count or kind mismatch.
pub fn check_layout(layout: &[ValueKind], values: &[Value]) -> Result<()> {
    if layout.len() != values.len() {
        return Err(ProtocolError::Configuration(format!(
            "layout declares {} fields, {} were produced",
            layout.len(),
            values.len()
        )));
    }
    for (index, (kind, value)) in layout.iter().zip(values).enumerate() {
        let found = value.kind();
        if &found != kind {
            return Err(ProtocolError::Configuration(format!(
                "field {index} declared as {kind}, produced {found}"
            )));
        }
    }
    Ok(())
}

/// Decoded field values handed to [`Reducer::from_fields`].
///
/// Each accessor takes the next field and fails with `FieldMismatch` when it
/// has a different kind or when the fields are exhausted.
#[derive(Debug)]
pub struct Fields {
    values: std::vec::IntoIter<Value>,
    index: usize,
}

macro_rules! field_accessor {
    ($($name:ident => $variant:ident : $ty:ty),* $(,)?) => {
        $(
            pub fn $name(&mut self) -> Result<$ty> {
                match self.next_value()? {
                    Value::$variant(v) => Ok(v),
                    other => Err(self.mismatch(ValueKind::$variant, &other)),
                }
            }
        )*
    };
}

impl Fields {
    pub fn new(values: Vec<Value>) -> Self {
        Fields {
            values: values.into_iter(),
            index: 0,
        }
    }

    /// Fields not consumed yet.
    pub fn remaining(&self) -> usize {
        self.values.len()
    }

    /// Take the next field whatever its kind.
    pub fn next_value(&mut self) -> Result<Value> {
        let value = self
            .values
            .next()
            .ok_or_else(|| ProtocolError::field_mismatch(self.index, "a field", "end of fields"))?;
        self.index += 1;
        Ok(value)
    }

    field_accessor! {
        bool => Bool: bool,
        flags => Flags: Flags,
        u8 => U8: u8,
        i8 => I8: i8,
        u16 => U16: u16,
        i16 => I16: i16,
        u32 => U32: u32,
        i32 => I32: i32,
        u64 => U64: u64,
        i64 => I64: i64,
        f32 => F32: f32,
        f64 => F64: f64,
        bytes => Bytes: Vec<u8>,
        text => Text: String,
    }

    /// Items of a list field.
    pub fn list(&mut self) -> Result<Vec<Value>> {
        match self.next_value()? {
            Value::List { items, .. } => Ok(items),
            other => Err(self.mismatch("list", &other)),
        }
    }

    /// Entries of a map field.
    pub fn map(&mut self) -> Result<Vec<(Value, Value)>> {
        match self.next_value()? {
            Value::Map { entries, .. } => Ok(entries),
            other => Err(self.mismatch("map", &other)),
        }
    }

    /// A nested reducer field.
    pub fn record<R: Reducer>(&mut self) -> Result<R> {
        match self.next_value()? {
            Value::Record(values) => R::from_fields(Fields::new(values)),
            other => Err(self.mismatch("record", &other)),
        }
    }

    fn mismatch(&self, expected: impl std::fmt::Display, found: &Value) -> ProtocolError {
        ProtocolError::field_mismatch(self.index - 1, expected, found.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    impl Reducer for Point {
        fn format() -> Layout {
            vec![ValueKind::I32, ValueKind::I32]
        }

        fn to_fields(&self) -> Vec<Value> {
            vec![self.x.into(), self.y.into()]
        }

        fn from_fields(mut fields: Fields) -> Result<Self> {
            Ok(Point {
                x: fields.i32()?,
                y: fields.i32()?,
            })
        }
    }

    #[derive(Debug, PartialEq)]
    struct Segment {
        label: String,
        start: Point,
        end: Point,
    }

    impl Reducer for Segment {
        fn format() -> Layout {
            vec![
                ValueKind::Text,
                ValueKind::record::<Point>(),
                ValueKind::record::<Point>(),
            ]
        }

        fn to_fields(&self) -> Vec<Value> {
            vec![
                self.label.clone().into(),
                Value::record(&self.start),
                Value::record(&self.end),
            ]
        }

        fn from_fields(mut fields: Fields) -> Result<Self> {
            Ok(Segment {
                label: fields.text()?,
                start: fields.record()?,
                end: fields.record()?,
            })
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_nested_reducer_fields() {
        let segment = Segment {
            label: "edge".into(),
            start: Point { x: 1, y: 2 },
            end: Point { x: -3, y: 4 },
        };
        let values = segment.to_fields();
        check_layout(&Segment::format(), &values).unwrap();
        assert_eq!(Segment::from_fields(Fields::new(values)).unwrap(), segment);
    }

    #[test]
    fn test_record_kind_is_fixed_when_fields_are() {
        assert_eq!(ValueKind::record::<Point>().fixed_size(), Some(8));
        assert_eq!(ValueKind::record::<Segment>().fixed_size(), None);
    }

    #[test]
    fn test_wrong_kind_reports_index() {
        let mut fields = Fields::new(vec![Value::I32(1), Value::Text("no".into())]);
        assert!(fields.i32().is_ok());
        match fields.i32() {
            Err(ProtocolError::FieldMismatch {
                index,
                expected,
                found,
            }) => {
                assert_eq!(index, 1);
                assert_eq!(expected, "i32");
                assert_eq!(found, "text");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_missing_field() {
        let mut fields = Fields::new(vec![]);
        assert!(matches!(
            fields.text(),
            Err(ProtocolError::FieldMismatch { index: 0, .. })
        ));
    }

    #[test]
    fn test_check_layout_rejects_count_and_kind() {
        let layout = Point::format();
        assert!(check_layout(&layout, &[Value::I32(1)]).is_err());
        assert!(check_layout(&layout, &[Value::I32(1), Value::U32(2)]).is_err());
        assert!(check_layout(&layout, &[Value::I32(1), Value::I32(2)]).is_ok());
    }
}
