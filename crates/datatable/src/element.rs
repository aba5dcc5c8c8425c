#![forbid(unsafe_code)]

//! Rust element types for each [`ColumnType`] and their binary encodings.

use crate::error::FormatError;
use crate::types::ColumnType;
use chrono::NaiveDateTime;
use std::fmt;

/// Exact identity of an element for distinct counting.
///
/// Floats compare by bit pattern, so `0.0` and `-0.0` are distinct while every
/// NaN with the same payload is one value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DistinctKey {
    Bits(u64),
    Bytes(Box<[u8]>),
}

/// A value that can be stored in a column.
///
/// Fixed-size types encode to exactly `COLUMN_TYPE.fixed_size()` bytes.
/// Variable-length types encode to a payload whose extent is recorded outside
/// the payload (column offset table or a length prefix in overflow blocks).
pub trait ColumnElement: Clone + fmt::Debug + Send + Sync + 'static {
    const COLUMN_TYPE: ColumnType;

    fn encode(&self, out: &mut Vec<u8>);

    /// Decode from exactly one element's payload.
    fn decode(bytes: &[u8]) -> Result<Self, FormatError>;

    fn distinct_key(&self) -> DistinctKey {
        let mut out = Vec::new();
        self.encode(&mut out);
        DistinctKey::Bytes(out.into_boxed_slice())
    }

    fn to_value(&self) -> Value;

    /// Text form used by string conversion and category labels.
    fn to_display_string(&self) -> String {
        self.to_value().to_string()
    }
}

/// Numeric elements that analyses can fold as `f64`.
pub trait NumericElement: ColumnElement + Copy + PartialOrd {
    fn to_f64(self) -> f64;
}

/// Type-erased element, one variant per [`ColumnType`].
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Boolean(bool),
    SByte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Date(NaiveDateTime),
    IndexList(IndexList),
    WeightedIndexList(WeightedIndexList),
    Vector(FloatVector),
    Matrix(FloatMatrix),
    Tensor3D(FloatTensor3D),
    Tensor4D(FloatTensor4D),
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Boolean(_) => ColumnType::Boolean,
            Value::SByte(_) => ColumnType::SByte,
            Value::Short(_) => ColumnType::Short,
            Value::Int(_) => ColumnType::Int,
            Value::Long(_) => ColumnType::Long,
            Value::Float(_) => ColumnType::Float,
            Value::Double(_) => ColumnType::Double,
            Value::String(_) => ColumnType::String,
            Value::Date(_) => ColumnType::Date,
            Value::IndexList(_) => ColumnType::IndexList,
            Value::WeightedIndexList(_) => ColumnType::WeightedIndexList,
            Value::Vector(_) => ColumnType::Vector,
            Value::Matrix(_) => ColumnType::Matrix,
            Value::Tensor3D(_) => ColumnType::Tensor3D,
            Value::Tensor4D(_) => ColumnType::Tensor4D,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::SByte(v) => Some(*v as f64),
            Value::Short(v) => Some(*v as f64),
            Value::Int(v) => Some(*v as f64),
            Value::Long(v) => Some(*v as f64),
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{v}"),
            Value::SByte(v) => write!(f, "{v}"),
            Value::Short(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(v) => f.write_str(v),
            Value::Date(v) => write!(f, "{}", v.format("%Y-%m-%dT%H:%M:%S%.f")),
            Value::IndexList(v) => write!(f, "{v}"),
            Value::WeightedIndexList(v) => write!(f, "{v}"),
            Value::Vector(v) => write!(f, "{v}"),
            Value::Matrix(v) => write!(f, "{v}"),
            Value::Tensor3D(v) => write!(f, "{v}"),
            Value::Tensor4D(v) => write!(f, "{v}"),
        }
    }
}

fn take<'a>(bytes: &mut &'a [u8], len: usize, what: &'static str) -> Result<&'a [u8], FormatError> {
    if bytes.len() < len {
        return Err(FormatError::Truncated(what));
    }
    let (head, rest) = bytes.split_at(len);
    *bytes = rest;
    Ok(head)
}

fn read_u32(bytes: &mut &[u8], what: &'static str) -> Result<u32, FormatError> {
    let raw = take(bytes, 4, what)?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn read_f32(bytes: &mut &[u8], what: &'static str) -> Result<f32, FormatError> {
    read_u32(bytes, what).map(f32::from_bits)
}

fn fixed<const N: usize>(bytes: &[u8], what: &'static str) -> Result<[u8; N], FormatError> {
    bytes.try_into().map_err(|_| FormatError::InvalidElement(what))
}

macro_rules! numeric_element {
    ($ty:ident, $column_type:ident, $variant:ident) => {
        impl ColumnElement for $ty {
            const COLUMN_TYPE: ColumnType = ColumnType::$column_type;

            fn encode(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
                Ok(<$ty>::from_le_bytes(fixed(bytes, stringify!($ty))?))
            }

            fn distinct_key(&self) -> DistinctKey {
                DistinctKey::Bits(numeric_bits!($ty, *self))
            }

            fn to_value(&self) -> Value {
                Value::$variant(*self)
            }
        }

        impl NumericElement for $ty {
            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

macro_rules! numeric_bits {
    (f32, $v:expr) => {
        $v.to_bits() as u64
    };
    (f64, $v:expr) => {
        $v.to_bits()
    };
    ($ty:ident, $v:expr) => {
        $v as i64 as u64
    };
}

numeric_element!(i8, SByte, SByte);
numeric_element!(i16, Short, Short);
numeric_element!(i32, Int, Int);
numeric_element!(i64, Long, Long);
numeric_element!(f32, Float, Float);
numeric_element!(f64, Double, Double);

impl ColumnElement for bool {
    const COLUMN_TYPE: ColumnType = ColumnType::Boolean;

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }

    fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        match bytes {
            [0] => Ok(false),
            [1] => Ok(true),
            _ => Err(FormatError::InvalidElement("bool")),
        }
    }

    fn distinct_key(&self) -> DistinctKey {
        DistinctKey::Bits(u64::from(*self))
    }

    fn to_value(&self) -> Value {
        Value::Boolean(*self)
    }
}

impl ColumnElement for String {
    const COLUMN_TYPE: ColumnType = ColumnType::String;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }

    fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        String::from_utf8(bytes.to_vec()).map_err(|_| FormatError::InvalidUtf8("string element"))
    }

    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn to_display_string(&self) -> String {
        self.clone()
    }
}

/// Dates are stored as microseconds since the Unix epoch.
impl ColumnElement for NaiveDateTime {
    const COLUMN_TYPE: ColumnType = ColumnType::Date;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.and_utc().timestamp_micros().to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        let micros = i64::from_le_bytes(fixed(bytes, "date")?);
        chrono::DateTime::from_timestamp_micros(micros)
            .map(|dt| dt.naive_utc())
            .ok_or(FormatError::InvalidElement("date"))
    }

    fn distinct_key(&self) -> DistinctKey {
        DistinctKey::Bits(self.and_utc().timestamp_micros() as u64)
    }

    fn to_value(&self) -> Value {
        Value::Date(*self)
    }
}

/// Sparse list of indices (e.g. bag-of-words token ids).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct IndexList {
    pub indices: Vec<u32>,
}

impl IndexList {
    pub fn new(indices: impl Into<Vec<u32>>) -> Self {
        Self {
            indices: indices.into(),
        }
    }
}

impl fmt::Display for IndexList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, idx) in self.indices.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{idx}")?;
        }
        f.write_str("}")
    }
}

impl ColumnElement for IndexList {
    const COLUMN_TYPE: ColumnType = ColumnType::IndexList;

    fn encode(&self, out: &mut Vec<u8>) {
        for idx in &self.indices {
            out.extend_from_slice(&idx.to_le_bytes());
        }
    }

    fn decode(mut bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() % 4 != 0 {
            return Err(FormatError::InvalidElement("index list"));
        }
        let mut indices = Vec::with_capacity(bytes.len() / 4);
        while !bytes.is_empty() {
            indices.push(read_u32(&mut bytes, "index list")?);
        }
        Ok(Self { indices })
    }

    fn to_value(&self) -> Value {
        Value::IndexList(self.clone())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeightedIndex {
    pub index: u32,
    pub weight: f32,
}

/// Sparse list of `(index, weight)` pairs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WeightedIndexList {
    pub items: Vec<WeightedIndex>,
}

impl WeightedIndexList {
    pub fn new(items: impl IntoIterator<Item = (u32, f32)>) -> Self {
        Self {
            items: items
                .into_iter()
                .map(|(index, weight)| WeightedIndex { index, weight })
                .collect(),
        }
    }
}

impl fmt::Display for WeightedIndexList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", item.index, item.weight)?;
        }
        f.write_str("}")
    }
}

impl ColumnElement for WeightedIndexList {
    const COLUMN_TYPE: ColumnType = ColumnType::WeightedIndexList;

    fn encode(&self, out: &mut Vec<u8>) {
        for item in &self.items {
            out.extend_from_slice(&item.index.to_le_bytes());
            out.extend_from_slice(&item.weight.to_le_bytes());
        }
    }

    fn decode(mut bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() % 8 != 0 {
            return Err(FormatError::InvalidElement("weighted index list"));
        }
        let mut items = Vec::with_capacity(bytes.len() / 8);
        while !bytes.is_empty() {
            let index = read_u32(&mut bytes, "weighted index")?;
            let weight = read_f32(&mut bytes, "weighted index")?;
            items.push(WeightedIndex { index, weight });
        }
        Ok(Self { items })
    }

    fn to_value(&self) -> Value {
        Value::WeightedIndexList(self.clone())
    }
}

/// Dense float vector.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FloatVector {
    pub values: Vec<f32>,
}

impl FloatVector {
    pub fn new(values: impl Into<Vec<f32>>) -> Self {
        Self {
            values: values.into(),
        }
    }

    pub fn zeros(len: usize) -> Self {
        Self {
            values: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn write_floats(f: &mut fmt::Formatter<'_>, values: &[f32]) -> fmt::Result {
    f.write_str("[")?;
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{v}")?;
    }
    f.write_str("]")
}

impl fmt::Display for FloatVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_floats(f, &self.values)
    }
}

fn encode_floats(values: &[f32], out: &mut Vec<u8>) {
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn decode_floats(mut bytes: &[u8], what: &'static str) -> Result<Vec<f32>, FormatError> {
    if bytes.len() % 4 != 0 {
        return Err(FormatError::InvalidElement(what));
    }
    let mut values = Vec::with_capacity(bytes.len() / 4);
    while !bytes.is_empty() {
        values.push(read_f32(&mut bytes, what)?);
    }
    Ok(values)
}

impl ColumnElement for FloatVector {
    const COLUMN_TYPE: ColumnType = ColumnType::Vector;

    fn encode(&self, out: &mut Vec<u8>) {
        encode_floats(&self.values, out);
    }

    fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        decode_floats(bytes, "vector").map(|values| Self { values })
    }

    fn to_value(&self) -> Value {
        Value::Vector(self.clone())
    }
}

/// Dense float tensor of rank `N`, values in row-major order.
#[derive(Clone, Debug, PartialEq)]
pub struct FloatTensor<const N: usize> {
    pub shape: [u32; N],
    pub values: Vec<f32>,
}

pub type FloatMatrix = FloatTensor<2>;
pub type FloatTensor3D = FloatTensor<3>;
pub type FloatTensor4D = FloatTensor<4>;

impl<const N: usize> FloatTensor<N> {
    /// Returns `None` when `values` does not match the element count of `shape`.
    pub fn new(shape: [u32; N], values: Vec<f32>) -> Option<Self> {
        let expected: usize = shape.iter().map(|d| *d as usize).product();
        (expected == values.len()).then_some(Self { shape, values })
    }

    pub fn zeros(shape: [u32; N]) -> Self {
        let len: usize = shape.iter().map(|d| *d as usize).product();
        Self {
            shape,
            values: vec![0.0; len],
        }
    }

    fn encode_tensor(&self, out: &mut Vec<u8>) {
        for dim in self.shape {
            out.extend_from_slice(&dim.to_le_bytes());
        }
        encode_floats(&self.values, out);
    }

    fn decode_tensor(mut bytes: &[u8]) -> Result<Self, FormatError> {
        let mut shape = [0u32; N];
        for dim in shape.iter_mut() {
            *dim = read_u32(&mut bytes, "tensor shape")?;
        }
        let values = decode_floats(bytes, "tensor")?;
        Self::new(shape, values).ok_or(FormatError::InvalidElement("tensor"))
    }
}

impl<const N: usize> fmt::Display for FloatTensor<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
        write!(f, "Tensor({}) ", dims.join("x"))?;
        write_floats(f, &self.values)
    }
}

macro_rules! tensor_element {
    ($rank:literal, $column_type:ident) => {
        impl ColumnElement for FloatTensor<$rank> {
            const COLUMN_TYPE: ColumnType = ColumnType::$column_type;

            fn encode(&self, out: &mut Vec<u8>) {
                self.encode_tensor(out);
            }

            fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
                Self::decode_tensor(bytes)
            }

            fn to_value(&self) -> Value {
                Value::$column_type(self.clone())
            }
        }
    };
}

tensor_element!(2, Matrix);
tensor_element!(3, Tensor3D);
tensor_element!(4, Tensor4D);

/// Append `item` so that it can be read back from a concatenated stream:
/// fixed-size elements as-is, variable-length ones behind a `u32` length.
pub(crate) fn encode_framed<T: ColumnElement>(item: &T, out: &mut Vec<u8>) {
    if T::COLUMN_TYPE.fixed_size().is_some() {
        item.encode(out);
        return;
    }
    let len_pos = out.len();
    out.extend_from_slice(&[0u8; 4]);
    item.encode(out);
    let len = (out.len() - len_pos - 4) as u32;
    out[len_pos..len_pos + 4].copy_from_slice(&len.to_le_bytes());
}

/// Inverse of [`encode_framed`]; advances `bytes` past the element.
pub(crate) fn decode_framed<T: ColumnElement>(bytes: &mut &[u8]) -> Result<T, FormatError> {
    let len = match T::COLUMN_TYPE.fixed_size() {
        Some(size) => size,
        None => read_u32(bytes, "element length")? as usize,
    };
    T::decode(take(bytes, len, "element")?)
}
