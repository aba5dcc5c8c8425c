//! Per-column key/value annotations.
//!
//! Metadata is an open bag of scalars kept in insertion order. The order is part
//! of the serialized form, so writing, reading and writing again yields the same
//! bytes.

use crate::error::FormatError;
use crate::types::ColumnType;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::io::{self, Write};

/// Well-known metadata keys.
pub mod keys {
    pub const INDEX: &str = "Index";
    pub const NAME: &str = "Name";
    pub const TYPE: &str = "Type";
    pub const IS_NUMERIC: &str = "IsNumeric";
    pub const HAS_BEEN_ANALYSED: &str = "HasBeenAnalysed";
    pub const IS_INTEGER: &str = "IsInteger";
    pub const MIN_VALUE: &str = "MinValue";
    pub const MAX_VALUE: &str = "MaxValue";
    pub const NAN_COUNT: &str = "NanCount";
    pub const INFINITY_COUNT: &str = "InfinityCount";
    pub const COUNT: &str = "Count";
    pub const MEAN: &str = "Mean";
    pub const STD_DEV: &str = "StdDev";
    pub const NUM_DISTINCT: &str = "NumDistinct";
    pub const CATEGORY_PREFIX: &str = "Category:";
    pub const NORMALIZATION_TYPE: &str = "NormalizationType";
    pub const NORMALIZE_SUBTRACT: &str = "NormalizeSubtract";
    pub const NORMALIZE_DIVIDE: &str = "NormalizeDivide";
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Number(f64),
    String(String),
}

impl MetaValue {
    const TAG_BOOL: u8 = 0;
    const TAG_INT: u8 = 1;
    const TAG_NUMBER: u8 = 2;
    const TAG_STRING: u8 = 3;

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetaValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numbers and integers both read as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Number(v) => Some(*v),
            MetaValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Bool(v) => write!(f, "{v}"),
            MetaValue::Int(v) => write!(f, "{v}"),
            MetaValue::Number(v) => write!(f, "{v}"),
            MetaValue::String(v) => f.write_str(v),
        }
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<u64> for MetaValue {
    fn from(v: u64) -> Self {
        MetaValue::Int(v as i64)
    }
}

impl From<usize> for MetaValue {
    fn from(v: usize) -> Self {
        MetaValue::Int(v as i64)
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        MetaValue::Number(v)
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::String(v.to_owned())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::String(v)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MetaData {
    values: IndexMap<String, MetaValue>,
}

impl MetaData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Insert or replace. Replacing keeps the key's original position.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<MetaValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<MetaValue> {
        self.values.shift_remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(MetaValue::as_bool)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(MetaValue::as_i64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(MetaValue::as_f64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MetaValue::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.get_str(keys::NAME)
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.set(keys::NAME, name.into());
    }

    pub fn index(&self) -> Option<u32> {
        self.get_i64(keys::INDEX).and_then(|v| u32::try_from(v).ok())
    }

    pub fn set_index(&mut self, index: u32) {
        self.set(keys::INDEX, i64::from(index));
    }

    pub fn set_column_type(&mut self, column_type: ColumnType) {
        self.set(keys::TYPE, column_type.name());
        self.set(keys::IS_NUMERIC, column_type.is_numeric());
    }

    pub fn is_numeric(&self) -> bool {
        self.get_bool(keys::IS_NUMERIC).unwrap_or(false)
    }

    pub fn has_been_analysed(&self) -> bool {
        self.get_bool(keys::HAS_BEEN_ANALYSED).unwrap_or(false)
    }

    pub fn set_analysed(&mut self) {
        self.set(keys::HAS_BEEN_ANALYSED, true);
    }

    /// Category labels written by the distinct indexer, in index order.
    pub fn category_labels(&self) -> Vec<(u32, &str)> {
        self.iter()
            .filter_map(|(k, v)| {
                let idx = k.strip_prefix(keys::CATEGORY_PREFIX)?.parse::<u32>().ok()?;
                Some((idx, v.as_str()?))
            })
            .collect()
    }

    pub fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        out.write_all(&(self.values.len() as u32).to_le_bytes())?;
        for (key, value) in &self.values {
            write_str(out, key)?;
            match value {
                MetaValue::Bool(v) => {
                    out.write_all(&[MetaValue::TAG_BOOL, u8::from(*v)])?;
                }
                MetaValue::Int(v) => {
                    out.write_all(&[MetaValue::TAG_INT])?;
                    out.write_all(&v.to_le_bytes())?;
                }
                MetaValue::Number(v) => {
                    out.write_all(&[MetaValue::TAG_NUMBER])?;
                    out.write_all(&v.to_le_bytes())?;
                }
                MetaValue::String(v) => {
                    out.write_all(&[MetaValue::TAG_STRING])?;
                    write_str(out, v)?;
                }
            }
        }
        Ok(())
    }

    /// Parse a metadata block, advancing `bytes` past it.
    pub fn read_from(bytes: &mut &[u8]) -> Result<Self, FormatError> {
        let count = read_u32(bytes)?;
        let mut values = IndexMap::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            let key = read_str(bytes)?;
            let tag = take(bytes, 1)?[0];
            let value = match tag {
                MetaValue::TAG_BOOL => MetaValue::Bool(take(bytes, 1)?[0] != 0),
                MetaValue::TAG_INT => MetaValue::Int(i64::from_le_bytes(take_array(bytes)?)),
                MetaValue::TAG_NUMBER => MetaValue::Number(f64::from_le_bytes(take_array(bytes)?)),
                MetaValue::TAG_STRING => MetaValue::String(read_str(bytes)?),
                other => return Err(FormatError::UnknownMetadataValue(other)),
            };
            values.insert(key, value);
        }
        Ok(Self { values })
    }
}

fn write_str(out: &mut impl Write, s: &str) -> io::Result<()> {
    out.write_all(&(s.len() as u32).to_le_bytes())?;
    out.write_all(s.as_bytes())
}

fn take<'a>(bytes: &mut &'a [u8], len: usize) -> Result<&'a [u8], FormatError> {
    if bytes.len() < len {
        return Err(FormatError::Truncated("metadata"));
    }
    let (head, rest) = bytes.split_at(len);
    *bytes = rest;
    Ok(head)
}

fn take_array<const N: usize>(bytes: &mut &[u8]) -> Result<[u8; N], FormatError> {
    let raw = take(bytes, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(raw);
    Ok(out)
}

fn read_u32(bytes: &mut &[u8]) -> Result<u32, FormatError> {
    take_array(bytes).map(u32::from_le_bytes)
}

fn read_str(bytes: &mut &[u8]) -> Result<String, FormatError> {
    let len = read_u32(bytes)? as usize;
    let raw = take(bytes, len)?;
    String::from_utf8(raw.to_vec()).map_err(|_| FormatError::InvalidUtf8("metadata"))
}
