//! Storage members: typed fields, keyed containers and homogeneous lists.
//!
//! Every member has exactly one [`MemberTag`]. Tags form a closed set; the byte
//! values are part of the storage format and never change.
//!
//! Members are owned by exactly one parent. Moving a member into a container or
//! list moves it out of wherever it was, so a tree can hold neither shared
//! members nor cycles.

use std::collections::HashMap;
use std::fmt;

use crate::core::value::{Value, ValueKind};
use crate::error::{constants, ProtocolError, Result};

/// Type tag written before every member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MemberTag {
    /// Ends a sibling sequence.
    End = 0,
    Container = 1,
    List = 2,
    Bool = 4,
    Float = 5,
    Double = 6,
    Byte = 7,
    Short = 8,
    Int = 9,
    Long = 10,
    SByte = 11,
    UShort = 12,
    UInt = 13,
    ULong = 14,
    Bytes = 15,
    String = 16,
}

impl MemberTag {
    /// # Errors
    /// `UnknownMemberTag` for bytes outside the tag set.
    pub fn from_byte(byte: u8) -> Result<Self> {
        let tag = match byte {
            0 => MemberTag::End,
            1 => MemberTag::Container,
            2 => MemberTag::List,
            4 => MemberTag::Bool,
            5 => MemberTag::Float,
            6 => MemberTag::Double,
            7 => MemberTag::Byte,
            8 => MemberTag::Short,
            9 => MemberTag::Int,
            10 => MemberTag::Long,
            11 => MemberTag::SByte,
            12 => MemberTag::UShort,
            13 => MemberTag::UInt,
            14 => MemberTag::ULong,
            15 => MemberTag::Bytes,
            16 => MemberTag::String,
            other => return Err(ProtocolError::UnknownMemberTag(other)),
        };
        Ok(tag)
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Value kind stored by a field tag, `None` for structural tags.
    pub fn value_kind(self) -> Option<ValueKind> {
        let kind = match self {
            MemberTag::End | MemberTag::Container | MemberTag::List => return None,
            MemberTag::Bool => ValueKind::Bool,
            MemberTag::Float => ValueKind::F32,
            MemberTag::Double => ValueKind::F64,
            MemberTag::Byte => ValueKind::U8,
            MemberTag::Short => ValueKind::I16,
            MemberTag::Int => ValueKind::I32,
            MemberTag::Long => ValueKind::I64,
            MemberTag::SByte => ValueKind::I8,
            MemberTag::UShort => ValueKind::U16,
            MemberTag::UInt => ValueKind::U32,
            MemberTag::ULong => ValueKind::U64,
            MemberTag::Bytes => ValueKind::Bytes,
            MemberTag::String => ValueKind::Text,
        };
        Some(kind)
    }

    /// Encoded size of a field's value when it never varies.
    pub fn fixed_size(self) -> Option<usize> {
        self.value_kind().and_then(|kind| kind.fixed_size())
    }

    pub fn is_field(self) -> bool {
        self.value_kind().is_some()
    }

    /// Field tag for a value, `None` when the value kind cannot be stored as a field.
    pub fn for_value(value: &Value) -> Option<Self> {
        let tag = match value {
            Value::Bool(_) => MemberTag::Bool,
            Value::F32(_) => MemberTag::Float,
            Value::F64(_) => MemberTag::Double,
            Value::U8(_) => MemberTag::Byte,
            Value::I16(_) => MemberTag::Short,
            Value::I32(_) => MemberTag::Int,
            Value::I64(_) => MemberTag::Long,
            Value::I8(_) => MemberTag::SByte,
            Value::U16(_) => MemberTag::UShort,
            Value::U32(_) => MemberTag::UInt,
            Value::U64(_) => MemberTag::ULong,
            Value::Bytes(_) => MemberTag::Bytes,
            Value::Text(_) => MemberTag::String,
            Value::Flags(_) | Value::List { .. } | Value::Map { .. } | Value::Record(_) => {
                return None
            }
        };
        Some(tag)
    }
}

impl fmt::Display for MemberTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A leaf value that has a field tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    tag: MemberTag,
    value: Value,
}

impl Field {
    /// # Errors
    /// `Storage` when the value's kind has no field tag (flags, lists, maps, records).
    pub fn new(value: impl Into<Value>) -> Result<Self> {
        let value = value.into();
        let tag = MemberTag::for_value(&value).ok_or_else(|| {
            ProtocolError::Storage(format!("{} values cannot be stored as fields", value.kind()))
        })?;
        Ok(Self { tag, value })
    }

    pub fn tag(&self) -> MemberTag {
        self.tag
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Field(Field),
    Container(Container),
    List(List),
}

impl Member {
    /// Shorthand for `Member::Field(Field::new(value)?)`.
    pub fn field(value: impl Into<Value>) -> Result<Self> {
        Ok(Member::Field(Field::new(value)?))
    }

    pub fn tag(&self) -> MemberTag {
        match self {
            Member::Field(field) => field.tag(),
            Member::Container(_) => MemberTag::Container,
            Member::List(_) => MemberTag::List,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Member::Field(field) => Some(field.value()),
            _ => None,
        }
    }

    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Member::Container(container) => Some(container),
            _ => None,
        }
    }

    pub fn as_container_mut(&mut self) -> Option<&mut Container> {
        match self {
            Member::Container(container) => Some(container),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Member::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut List> {
        match self {
            Member::List(list) => Some(list),
            _ => None,
        }
    }
}

impl From<Field> for Member {
    fn from(field: Field) -> Self {
        Member::Field(field)
    }
}

impl From<Container> for Member {
    fn from(container: Container) -> Self {
        Member::Container(container)
    }
}

impl From<List> for Member {
    fn from(list: List) -> Self {
        Member::List(list)
    }
}

/// Keys may not be empty or contain `.`, which separates keys in dotted ids.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains('.') {
        return Err(ProtocolError::Storage(format!(
            "{}: {key:?}",
            constants::ERR_INVALID_KEY
        )));
    }
    Ok(())
}

/// Children under unique keys, kept in insertion order.
///
/// Keys are indexed, so lookups and inserts do not scan the children.
#[derive(Clone, Default)]
pub struct Container {
    children: Vec<(String, Member)>,
    index: HashMap<String, usize>,
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        self.children == other.children
    }
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    fn push_child(&mut self, key: String, member: Member) -> usize {
        let i = self.children.len();
        self.index.insert(key.clone(), i);
        self.children.push((key, member));
        i
    }

    pub fn get(&self, key: &str) -> Option<&Member> {
        self.position(key).map(|i| &self.children[i].1)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Member> {
        let i = self.position(key)?;
        Some(&mut self.children[i].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or replace the member under `key`. A replaced member keeps its
    /// position and is returned.
    pub fn insert(&mut self, key: impl Into<String>, member: impl Into<Member>) -> Result<Option<Member>> {
        let key = key.into();
        validate_key(&key)?;
        let member = member.into();
        match self.position(&key) {
            Some(i) => Ok(Some(std::mem::replace(&mut self.children[i].1, member))),
            None => {
                self.push_child(key, member);
                Ok(None)
            }
        }
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, member: impl Into<Member>) -> Result<Self> {
        self.insert(key, member)?;
        Ok(self)
    }

    pub fn remove(&mut self, key: &str) -> Option<Member> {
        let i = self.index.remove(key)?;
        let (_, member) = self.children.remove(i);
        for (shifted, (k, _)) in self.children.iter().enumerate().skip(i) {
            if let Some(slot) = self.index.get_mut(k.as_str()) {
                *slot = shifted;
            }
        }
        Some(member)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Member)> {
        self.children.iter().map(|(k, m)| (k.as_str(), m))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|(k, _)| k.as_str())
    }

    /// Child under `key`, or a new empty container inserted there.
    pub(crate) fn child_container(&mut self, key: &str) -> Result<&mut Container> {
        let i = match self.position(key) {
            Some(i) => i,
            None => {
                validate_key(key)?;
                self.push_child(key.to_string(), Member::Container(Container::new()))
            }
        };
        match &mut self.children[i].1 {
            Member::Container(container) => Ok(container),
            other => Err(ProtocolError::Storage(format!(
                "{}: {key} is a {}",
                constants::ERR_NOT_A_PARENT,
                other.tag()
            ))),
        }
    }

    /// Insert a decoded child, rejecting duplicate keys.
    pub(crate) fn insert_new(&mut self, key: String, member: Member) -> Result<()> {
        if self.contains_key(&key) {
            return Err(ProtocolError::Storage(format!("duplicate key {key:?}")));
        }
        validate_key(&key)?;
        self.push_child(key, member);
        Ok(())
    }
}

/// Unkeyed members that all share one tag.
#[derive(Debug, Clone, PartialEq)]
pub struct List {
    element: MemberTag,
    items: Vec<Member>,
}

impl List {
    /// # Errors
    /// `Storage` when `element` is the end sentinel.
    pub fn new(element: MemberTag) -> Result<Self> {
        if element == MemberTag::End {
            return Err(ProtocolError::Storage(
                "a list cannot hold end sentinels".to_string(),
            ));
        }
        Ok(Self {
            element,
            items: Vec::new(),
        })
    }

    /// A list of fields built from plain values.
    pub fn of_values<I, V>(element: MemberTag, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut list = Self::new(element)?;
        for value in values {
            list.push(Member::field(value)?)?;
        }
        Ok(list)
    }

    pub fn element(&self) -> MemberTag {
        self.element
    }

    /// # Errors
    /// `Storage` when the member's tag differs from the list's element tag.
    pub fn push(&mut self, member: impl Into<Member>) -> Result<()> {
        let member = member.into();
        if member.tag() != self.element {
            return Err(ProtocolError::Storage(format!(
                "{}: expected {}, got {}",
                constants::ERR_LIST_ELEMENT,
                self.element,
                member.tag()
            )));
        }
        self.items.push(member);
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&Member> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Member> {
        self.items.get_mut(index)
    }

    pub fn remove(&mut self, index: usize) -> Option<Member> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.items.iter()
    }
}
