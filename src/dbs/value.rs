//! Module define [Value], the opaque content type carried by nodes.
//!
//! Values form a JSON-like tree of tagged variants. Maps keep their
//! properties sorted by key so that equality, serialization and
//! diffing are all deterministic. Locations inside a value tree are
//! addressed by [Path]s, ordered sequences of field-name or
//! array-index [Token]s.

use arbitrary::Arbitrary;
use cbordata::{Cbor, Cborize, FromCbor, IntoCbor, Tag};
use serde::{Deserialize, Serialize};

use std::{convert::TryFrom, fmt, mem, result};

use crate::{dbs::Footprint, Error, Result};

/// This value must change only when the shape of Value type changes.
/// High 16-bits identify the type and lower 16-bits identify the
/// version.
const VALUE_VER: u32 = 0x00020001;
const PROPERTY_VER: u32 = 0x00030001;
const TOKEN_VER: u32 = 0x00040001;

/// Value type, the tagged-variant content carried by nodes.
///
/// `IntoCbor`/`FromCbor` are implemented by hand below instead of via
/// `#[derive(Cborize)]`: the derive macro mis-generates the match arm
/// for a unit variant mixed with struct variants (it yields an
/// unused `Cbor` expression instead of pushing the variant tag), which
/// fails to type-check. This impl mirrors exactly what the derive
/// produces for the struct variants, with that same treatment applied
/// to `Null`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool { value: bool },
    Integer { value: i64 },
    Float { value: f64 },
    Text { value: String },
    Array { items: Vec<Value> },
    Map { props: Vec<Property> },
}

impl IntoCbor for Value {
    fn into_cbor(self) -> cbordata::Result<Cbor> {
        let value = self;

        let mut items: Vec<Cbor> = Vec::default();

        let val: Cbor = {
            let id = Value::ID.into_cbor()?;
            Tag::from_identifier(id).into()
        };
        items.push(val);

        match value {
            Value::Null => {
                items.push("Null".into_cbor()?);
            }
            Value::Bool { value } => {
                items.push("Bool".into_cbor()?);
                items.push(value.into_cbor()?);
            }
            Value::Integer { value } => {
                items.push("Integer".into_cbor()?);
                items.push(value.into_cbor()?);
            }
            Value::Float { value } => {
                items.push("Float".into_cbor()?);
                items.push(value.into_cbor()?);
            }
            Value::Text { value } => {
                items.push("Text".into_cbor()?);
                items.push(value.into_cbor()?);
            }
            Value::Array { items: elems } => {
                items.push("Array".into_cbor()?);
                items.push(elems.into_cbor()?);
            }
            Value::Map { props } => {
                items.push("Map".into_cbor()?);
                items.push(props.into_cbor()?);
            }
        }
        items.into_cbor()
    }
}

impl FromCbor for Value {
    fn from_cbor(value: Cbor) -> cbordata::Result<Value> {
        use cbordata::Error;

        let mut items = Vec::<Cbor>::from_cbor(value)?;

        if items.len() < 2 {
            cbordata::err_at!(FailConvert, msg: "empty msg for Value")?;
        }
        let data_id = items.remove(0);
        let type_id: Cbor = {
            let id = Value::ID.into_cbor()?;
            Tag::from_identifier(id).into()
        };
        if data_id != type_id {
            cbordata::err_at!(FailConvert, msg: "bad Value")?
        }

        let variant_name = String::from_cbor(items.remove(0))?;

        match variant_name.as_str() {
            "Null" => {
                if !items.is_empty() {
                    cbordata::err_at!(FailConvert, msg: "bad arity {}", items.len())?;
                }
            }
            "Bool" | "Integer" | "Float" | "Text" | "Array" | "Map" => {
                if 1 != items.len() {
                    cbordata::err_at!(
                        FailConvert, msg: "bad arity {} {}", 1, items.len()
                    )?;
                }
            }
            _ => cbordata::err_at!(
                FailConvert, msg: "invalid variant_name {}", variant_name
            )?,
        }

        let val = match variant_name.as_str() {
            "Null" => Value::Null,
            "Bool" => Value::Bool { value: FromCbor::from_cbor(items.remove(0))? },
            "Integer" => Value::Integer { value: FromCbor::from_cbor(items.remove(0))? },
            "Float" => Value::Float { value: FromCbor::from_cbor(items.remove(0))? },
            "Text" => Value::Text { value: FromCbor::from_cbor(items.remove(0))? },
            "Array" => Value::Array { items: FromCbor::from_cbor(items.remove(0))? },
            "Map" => Value::Map { props: FromCbor::from_cbor(items.remove(0))? },
            _ => cbordata::err_at!(
                FailConvert, msg: "invalid variant_name {}", variant_name
            )?,
        };
        Ok(val)
    }
}

/// Single `key -> value` property of a map-variant [Value].
#[derive(Clone, Debug, PartialEq, Cborize, Serialize, Deserialize)]
pub struct Property {
    pub key: String,
    pub value: Value,
}

impl Property {
    pub const ID: u32 = PROPERTY_VER;

    #[inline]
    pub fn new<K>(key: K, value: Value) -> Property
    where
        K: ToString,
    {
        Property {
            key: key.to_string(),
            value,
        }
    }
}

/// Single component of a [Path] into a value tree.
#[derive(
    Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Cborize, Serialize, Deserialize,
)]
pub enum Token {
    Field { name: String },
    Index { index: usize },
}

/// Ordered sequence of tokens addressing a location in a value tree.
pub type Path = Vec<Token>;

impl Token {
    pub const ID: u32 = TOKEN_VER;

    #[inline]
    pub fn field<K>(name: K) -> Token
    where
        K: ToString,
    {
        Token::Field {
            name: name.to_string(),
        }
    }

    #[inline]
    pub fn index(index: usize) -> Token {
        Token::Index { index }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        match self {
            Token::Field { name } => write!(f, ".{}", name),
            Token::Index { index } => write!(f, "[{}]", index),
        }
    }
}

impl Default for Value {
    fn default() -> Value {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Value {
        Value::Bool { value }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Value {
        Value::Integer { value }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Value {
        Value::Float { value }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Value {
        Value::Text {
            value: value.to_string(),
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Value {
        Value::Text { value }
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Value {
        Value::Array { items }
    }
}

impl Value {
    pub const ID: u32 = VALUE_VER;

    /// Create an empty map value.
    #[inline]
    pub fn new_map() -> Value {
        Value::Map { props: Vec::new() }
    }

    /// Build a map value from properties. Keys are sorted, later
    /// duplicates win.
    pub fn from_props(mut props: Vec<Property>) -> Value {
        props.sort_by(|a, b| a.key.cmp(&b.key));
        props.dedup_by(|a, b| {
            let dup = a.key == b.key;
            if dup {
                // the later value moves into the surviving slot.
                b.value = mem::take(&mut a.value);
            }
            dup
        });
        Value::Map { props }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[inline]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text { value } => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn as_items(&self) -> Option<&[Value]> {
        match self {
            Value::Array { items } => Some(items),
            _ => None,
        }
    }

    #[inline]
    pub fn as_props(&self) -> Option<&[Property]> {
        match self {
            Value::Map { props } => Some(props),
            _ => None,
        }
    }

    /// Set `key` to `value` directly under this map value. Return the
    /// older value, if any.
    pub fn set_field<K>(&mut self, key: K, value: Value) -> Result<Option<Value>>
    where
        K: ToString,
    {
        let key = key.to_string();
        match self {
            Value::Map { props } => {
                match props.binary_search_by(|p| p.key.as_str().cmp(key.as_str())) {
                    Ok(i) => Ok(Some(mem::replace(&mut props[i].value, value))),
                    Err(i) => {
                        props.insert(i, Property { key, value });
                        Ok(None)
                    }
                }
            }
            _ => err_at!(FailConvert, msg: "set_field on non-map value"),
        }
    }

    /// Get the value for `key` directly under this map value.
    pub fn get_field(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map { props } => props
                .binary_search_by(|p| p.key.as_str().cmp(key))
                .ok()
                .map(|i| &props[i].value),
            _ => None,
        }
    }

    /// Resolve `path` within this value tree.
    pub fn get(&self, path: &[Token]) -> Option<&Value> {
        match path.split_first() {
            None => Some(self),
            Some((token, rest)) => self.child(token).and_then(|child| child.get(rest)),
        }
    }

    /// Resolve `path` within this value tree, mutable variant.
    pub fn get_mut(&mut self, path: &[Token]) -> Option<&mut Value> {
        match path.split_first() {
            None => Some(self),
            Some((token, rest)) => {
                self.child_mut(token).and_then(|child| child.get_mut(rest))
            }
        }
    }

    /// Set the value at `path`, replacing or inserting at the final
    /// token. Intermediate components must exist. Return the older
    /// value when one is replaced.
    pub fn set(&mut self, path: &[Token], value: Value) -> Result<Option<Value>> {
        let (token, rest) = match path.split_first() {
            None => return Ok(Some(mem::replace(self, value))),
            Some((token, rest)) => (token, rest),
        };

        if rest.is_empty() {
            match (token, self) {
                (Token::Field { name }, Value::Map { props }) => {
                    match props.binary_search_by(|p| p.key.as_str().cmp(name.as_str())) {
                        Ok(i) => Ok(Some(mem::replace(&mut props[i].value, value))),
                        Err(i) => {
                            let key = name.clone();
                            props.insert(i, Property { key, value });
                            Ok(None)
                        }
                    }
                }
                (Token::Index { index }, Value::Array { items }) => {
                    match items.get_mut(*index) {
                        Some(slot) => Ok(Some(mem::replace(slot, value))),
                        None => {
                            err_at!(NotFound, msg: "array index [{}] out of bounds", index)
                        }
                    }
                }
                (token, _) => {
                    err_at!(FailConvert, msg: "token {} does not match value shape", token)
                }
            }
        } else {
            match self.child_mut(token) {
                Some(child) => child.set(rest, value),
                None => err_at!(NotFound, msg: "missing path component {}", token),
            }
        }
    }

    /// Remove and return the value at `path`. Removing from an array
    /// shifts the elements after the index.
    pub fn remove(&mut self, path: &[Token]) -> Result<Value> {
        let (token, rest) = match path.split_first() {
            None => return err_at!(FailConvert, msg: "cannot remove at empty path"),
            Some((token, rest)) => (token, rest),
        };

        if rest.is_empty() {
            match (token, self) {
                (Token::Field { name }, Value::Map { props }) => {
                    match props.binary_search_by(|p| p.key.as_str().cmp(name.as_str())) {
                        Ok(i) => Ok(props.remove(i).value),
                        Err(_) => err_at!(NotFound, msg: "missing field .{}", name),
                    }
                }
                (Token::Index { index }, Value::Array { items }) => {
                    if *index < items.len() {
                        Ok(items.remove(*index))
                    } else {
                        err_at!(NotFound, msg: "array index [{}] out of bounds", index)
                    }
                }
                (token, _) => {
                    err_at!(FailConvert, msg: "token {} does not match value shape", token)
                }
            }
        } else {
            match self.child_mut(token) {
                Some(child) => child.remove(rest),
                None => err_at!(NotFound, msg: "missing path component {}", token),
            }
        }
    }

    /// Insert `value` at `index` in the array addressed by `path`,
    /// shifting later elements right. `index == len` appends.
    pub fn array_insert(
        &mut self,
        path: &[Token],
        index: usize,
        value: Value,
    ) -> Result<()> {
        match self.get_mut(path) {
            Some(Value::Array { items }) if index <= items.len() => {
                items.insert(index, value);
                Ok(())
            }
            Some(Value::Array { items }) => {
                err_at!(NotFound, msg: "array insert [{}]/{}", index, items.len())
            }
            Some(_) => err_at!(FailConvert, msg: "array insert into non-array"),
            None => err_at!(NotFound, msg: "missing array at path"),
        }
    }

    /// Remove and return the element at `index` in the array addressed
    /// by `path`.
    pub fn array_remove(&mut self, path: &[Token], index: usize) -> Result<Value> {
        match self.get_mut(path) {
            Some(Value::Array { items }) if index < items.len() => {
                Ok(items.remove(index))
            }
            Some(Value::Array { items }) => {
                err_at!(NotFound, msg: "array remove [{}]/{}", index, items.len())
            }
            Some(_) => err_at!(FailConvert, msg: "array remove from non-array"),
            None => err_at!(NotFound, msg: "missing array at path"),
        }
    }

    fn child(&self, token: &Token) -> Option<&Value> {
        match (token, self) {
            (Token::Field { name }, Value::Map { .. }) => self.get_field(name),
            (Token::Index { index }, Value::Array { items }) => items.get(*index),
            _ => None,
        }
    }

    fn child_mut(&mut self, token: &Token) -> Option<&mut Value> {
        match (token, self) {
            (Token::Field { name }, Value::Map { props }) => props
                .binary_search_by(|p| p.key.as_str().cmp(name.as_str()))
                .ok()
                .map(move |i| &mut props[i].value),
            (Token::Index { index }, Value::Array { items }) => items.get_mut(*index),
            _ => None,
        }
    }

    /// Recursively sort map properties, later duplicates win. Values
    /// built through this module's API are always normalized; this is
    /// for content crossing the engine boundary.
    pub fn normalize(&mut self) {
        match self {
            Value::Array { items } => {
                for item in items.iter_mut() {
                    item.normalize()
                }
            }
            Value::Map { props } => {
                for prop in props.iter_mut() {
                    prop.value.normalize()
                }
                props.sort_by(|a, b| a.key.cmp(&b.key));
                props.dedup_by(|a, b| {
                    let dup = a.key == b.key;
                    if dup {
                        b.value = mem::take(&mut a.value);
                    }
                    dup
                });
            }
            _ => (),
        }
    }
}

impl Footprint for Value {
    fn footprint(&self) -> Result<isize> {
        let mut size = err_at!(FailConvert, isize::try_from(mem::size_of::<Value>()))?;

        size += match self {
            Value::Text { value } => {
                err_at!(FailConvert, isize::try_from(value.capacity()))?
            }
            Value::Array { items } => {
                let mut n = 0;
                for item in items.iter() {
                    n += item.footprint()?;
                }
                n
            }
            Value::Map { props } => {
                let mut n = 0;
                for prop in props.iter() {
                    n += err_at!(FailConvert, isize::try_from(prop.key.capacity()))?;
                    n += prop.value.footprint()?;
                }
                n
            }
            _ => 0,
        };

        Ok(size)
    }
}

impl<'a> Arbitrary<'a> for Value {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let depth = u.int_in_range::<u8>(0..=2)?;
        arbitrary_value(u, depth)
    }
}

fn arbitrary_value(
    u: &mut arbitrary::Unstructured,
    depth: u8,
) -> arbitrary::Result<Value> {
    let variant = match depth {
        0 => u.int_in_range::<u8>(0..=4)?,
        _ => u.int_in_range::<u8>(0..=6)?,
    };
    let value = match variant {
        0 => Value::Null,
        1 => Value::Bool {
            value: u.arbitrary()?,
        },
        2 => Value::Integer {
            value: u.arbitrary()?,
        },
        3 => Value::Float {
            value: f64::from(u.arbitrary::<i32>()?) / 64.0,
        },
        4 => Value::Text {
            value: u.arbitrary()?,
        },
        5 => {
            let n = u.int_in_range::<u8>(0..=4)?;
            let mut items = vec![];
            for _ in 0..n {
                items.push(arbitrary_value(u, depth - 1)?);
            }
            Value::Array { items }
        }
        _ => {
            let n = u.int_in_range::<u8>(0..=4)?;
            let mut props = vec![];
            for i in 0..n {
                let key = format!("k{}-{}", i, u.int_in_range::<u8>(0..=9)?);
                props.push(Property::new(key, arbitrary_value(u, depth - 1)?));
            }
            Value::from_props(props)
        }
    };
    Ok(value)
}

#[cfg(test)]
#[path = "value_test.rs"]
mod value_test;
