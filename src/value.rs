//! The polymorphic value tree produced and consumed by the schema-less
//! codec paths.
//!
//! A decoded payload is a [`TagDict`]: an insertion-ordered mapping from
//! integer tag to [`Value`]. A `TagDict` is *not* a wire Map — it is the
//! in-memory form of a struct, its keys are field tags, and its iteration
//! order is insignificant for equality.

use std::borrow::Cow;
use std::iter::FromIterator;

/// A single decoded (or to-be-encoded) wire value.
///
/// String and byte payloads are carried as `Cow` so that zero-copy decoding
/// can hand out borrows into the input buffer; everything else owns its
/// data. `into_owned` detaches a borrowed tree from its buffer.
#[derive(Debug, Clone)]
pub enum Value<'a> {
    /// Any integer width on the wire, including `ZeroTag`.
    Int(i64),
    /// Both `Float` and `Double` wire values; floats are widened on read.
    Double(f64),
    /// A `String1`/`String4` payload that decoded as UTF-8.
    String(Cow<'a, str>),
    /// A `SimpleList` blob, or a string payload that was not valid UTF-8.
    Bytes(Cow<'a, [u8]>),
    /// A `List` of headed values.
    List(Vec<Value<'a>>),
    /// A wire `Map`: key/value pairs in insertion order. Keys may be any
    /// value, composite ones included; equality ignores pair order.
    Map(Vec<(Value<'a>, Value<'a>)>),
    /// A nested struct.
    Struct(TagDict<'a>),
}

impl<'a> Value<'a> {
    /// Short name of the variant, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match *self {
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Struct(_) => "struct",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match *self {
            Value::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match *self {
            Value::String(ref s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match *self {
            Value::Bytes(ref b) => Some(b),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&TagDict<'a>> {
        match *self {
            Value::Struct(ref d) => Some(d),
            _ => None,
        }
    }

    /// Detaches the value from the buffer it may borrow from.
    pub fn into_owned(self) -> Value<'static> {
        match self {
            Value::Int(v) => Value::Int(v),
            Value::Double(v) => Value::Double(v),
            Value::String(s) => Value::String(Cow::Owned(s.into_owned())),
            Value::Bytes(b) => Value::Bytes(Cow::Owned(b.into_owned())),
            Value::List(items) => {
                Value::List(items.into_iter().map(Value::into_owned).collect())
            }
            Value::Map(pairs) => Value::Map(
                pairs
                    .into_iter()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect(),
            ),
            Value::Struct(dict) => Value::Struct(dict.into_owned()),
        }
    }
}

/// Equality is structural; Map and TagDict entries compare without regard
/// to insertion order.
impl<'a, 'b> PartialEq<Value<'b>> for Value<'a> {
    fn eq(&self, other: &Value<'b>) -> bool {
        match (self, other) {
            (&Value::Int(a), &Value::Int(b)) => a == b,
            (&Value::Double(a), &Value::Double(b)) => a == b,
            (&Value::String(ref a), &Value::String(ref b)) => a == b,
            (&Value::Bytes(ref a), &Value::Bytes(ref b)) => a == b,
            (&Value::List(ref a), &Value::List(ref b)) => a == b,
            (&Value::Map(ref a), &Value::Map(ref b)) => {
                a.len() == b.len()
                    && a.iter().all(|&(ref key, ref val)| {
                        b.iter().any(|&(ref k, ref v)| key == k && val == v)
                    })
            }
            (&Value::Struct(ref a), &Value::Struct(ref b)) => a == b,
            _ => false,
        }
    }
}

macro_rules! from_int_for_value {
    ($($t:ty),+) => { $(
        impl From<$t> for Value<'static> {
            fn from(v: $t) -> Self {
                Value::Int(v as i64)
            }
        }
    )+ };
}

from_int_for_value!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value<'static> {
    fn from(b: bool) -> Self {
        Value::Int(b as i64)
    }
}

impl From<f32> for Value<'static> {
    fn from(v: f32) -> Self {
        Value::Double(v as f64)
    }
}

impl From<f64> for Value<'static> {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl<'a> From<&'a str> for Value<'a> {
    fn from(s: &'a str) -> Self {
        Value::String(Cow::Borrowed(s))
    }
}

impl From<String> for Value<'static> {
    fn from(s: String) -> Self {
        Value::String(Cow::Owned(s))
    }
}

impl<'a> From<&'a [u8]> for Value<'a> {
    fn from(b: &'a [u8]) -> Self {
        Value::Bytes(Cow::Borrowed(b))
    }
}

impl From<Vec<u8>> for Value<'static> {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(Cow::Owned(b))
    }
}

impl<'a> From<Vec<Value<'a>>> for Value<'a> {
    fn from(items: Vec<Value<'a>>) -> Self {
        Value::List(items)
    }
}

impl<'a> From<TagDict<'a>> for Value<'a> {
    fn from(dict: TagDict<'a>) -> Self {
        Value::Struct(dict)
    }
}

/// An ordered mapping from field tag to value — the schema-less form of a
/// struct.
///
/// Insertion order is preserved (it is observable through encoding), but
/// two dicts with the same entries in different orders compare equal.
#[derive(Debug, Clone, Default)]
pub struct TagDict<'a> {
    entries: Vec<(u8, Value<'a>)>,
}

impl<'a> TagDict<'a> {
    pub fn new() -> Self {
        TagDict {
            entries: Vec::new(),
        }
    }

    pub fn with_capacity(cap: usize) -> Self {
        TagDict {
            entries: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts a value under `tag`, replacing (in place) any previous value
    /// and returning it.
    pub fn insert(&mut self, tag: u8, value: Value<'a>) -> Option<Value<'a>> {
        for entry in &mut self.entries {
            if entry.0 == tag {
                return Some(::std::mem::replace(&mut entry.1, value));
            }
        }
        self.entries.push((tag, value));
        None
    }

    pub fn get(&self, tag: u8) -> Option<&Value<'a>> {
        self.entries
            .iter()
            .find(|entry| entry.0 == tag)
            .map(|entry| &entry.1)
    }

    pub fn contains(&self, tag: u8) -> bool {
        self.get(tag).is_some()
    }

    pub fn remove(&mut self, tag: u8) -> Option<Value<'a>> {
        let pos = self.entries.iter().position(|entry| entry.0 == tag)?;
        Some(self.entries.remove(pos).1)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> ::std::slice::Iter<(u8, Value<'a>)> {
        self.entries.iter()
    }

    /// Detaches the dict from the buffer it may borrow from.
    pub fn into_owned(self) -> TagDict<'static> {
        TagDict {
            entries: self
                .entries
                .into_iter()
                .map(|(tag, value)| (tag, value.into_owned()))
                .collect(),
        }
    }
}

impl<'a, 'b> PartialEq<TagDict<'b>> for TagDict<'a> {
    fn eq(&self, other: &TagDict<'b>) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .all(|&(tag, ref value)| other.get(tag).map_or(false, |v| value == v))
    }
}

impl<'a> FromIterator<(u8, Value<'a>)> for TagDict<'a> {
    fn from_iter<I: IntoIterator<Item = (u8, Value<'a>)>>(iter: I) -> Self {
        let mut dict = TagDict::new();
        for (tag, value) in iter {
            dict.insert(tag, value);
        }
        dict
    }
}

impl<'a> IntoIterator for TagDict<'a> {
    type Item = (u8, Value<'a>);
    type IntoIter = ::std::vec::IntoIter<(u8, Value<'a>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_preserves_position_on_replace() {
        let mut dict = TagDict::new();
        dict.insert(3, Value::Int(1));
        dict.insert(0, Value::Int(2));
        let old = dict.insert(3, Value::Int(9));
        assert_eq!(old, Some(Value::Int(1)));
        let tags: Vec<u8> = dict.iter().map(|e| e.0).collect();
        assert_eq!(tags, vec![3, 0]);
    }

    #[test]
    fn equality_ignores_insertion_order() {
        let a: TagDict = vec![(0, Value::Int(1)), (1, Value::from("x"))]
            .into_iter()
            .collect();
        let b: TagDict = vec![(1, Value::from("x")), (0, Value::Int(1))]
            .into_iter()
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn map_equality_ignores_pair_order() {
        let a = Value::Map(vec![
            (Value::from("k1"), Value::Int(1)),
            (Value::from("k2"), Value::Int(2)),
        ]);
        let b = Value::Map(vec![
            (Value::from("k2"), Value::Int(2)),
            (Value::from("k1"), Value::Int(1)),
        ]);
        assert_eq!(a, b);
        let c = Value::Map(vec![(Value::from("k1"), Value::Int(7))]);
        assert_ne!(a, c);
    }

    #[test]
    fn into_owned_detaches_borrows() {
        let buf = b"hello".to_vec();
        let dict: TagDict = {
            let mut d = TagDict::new();
            d.insert(0, Value::from(&buf[..]));
            d
        };
        let owned: TagDict<'static> = dict.into_owned();
        drop(buf);
        assert_eq!(owned.get(0).unwrap().as_bytes(), Some(&b"hello"[..]));
    }
}
