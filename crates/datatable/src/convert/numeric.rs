use crate::element::{ColumnElement, NumericElement};
use crate::error::ConversionError;
use crate::types::ColumnType;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// Element-wise numeric converter from `S` to `D`.
pub type Converter<S, D> = fn(S) -> Result<D, ConversionError>;

/// Checked cast between numeric element types.
///
/// Widening casts always succeed. Narrowing integer casts and float to integer
/// casts fail with [`ConversionError::OutOfRange`] instead of wrapping or
/// saturating. Floats are rounded to the nearest integer; NaN and infinities
/// have no integer representation.
pub trait NumericCast<D>: Sized {
    fn cast(self) -> Result<D, ConversionError>;
}

fn out_of_range<S: fmt::Display>(value: S, to: ColumnType) -> ConversionError {
    ConversionError::OutOfRange {
        value: value.to_string(),
        to,
    }
}

macro_rules! int_to_int {
    ($src:ty => $($dst:ty),+) => {
        $(
            impl NumericCast<$dst> for $src {
                fn cast(self) -> Result<$dst, ConversionError> {
                    <$dst>::try_from(self).map_err(|_| out_of_range(self, <$dst as ColumnElement>::COLUMN_TYPE))
                }
            }
        )+
    };
}

int_to_int!(i8 => i8, i16, i32, i64);
int_to_int!(i16 => i8, i16, i32, i64);
int_to_int!(i32 => i8, i16, i32, i64);
int_to_int!(i64 => i8, i16, i32, i64);

macro_rules! to_float {
    ($($src:ty),+ => $dst:ty) => {
        $(
            impl NumericCast<$dst> for $src {
                fn cast(self) -> Result<$dst, ConversionError> {
                    Ok(self as $dst)
                }
            }
        )+
    };
}

to_float!(i8, i16, i32, i64, f32 => f32);
to_float!(i8, i16, i32, i64, f32, f64 => f64);

impl NumericCast<f32> for f64 {
    fn cast(self) -> Result<f32, ConversionError> {
        if self.is_finite() && self.abs() > f32::MAX as f64 {
            return Err(out_of_range(self, ColumnType::Float));
        }
        Ok(self as f32)
    }
}

macro_rules! float_to_int {
    ($src:ty => $($dst:ty),+) => {
        $(
            impl NumericCast<$dst> for $src {
                fn cast(self) -> Result<$dst, ConversionError> {
                    let to = <$dst as ColumnElement>::COLUMN_TYPE;
                    if !self.is_finite() {
                        return Err(out_of_range(self, to));
                    }
                    let rounded = (self as f64).round();
                    // MIN is a power of two, so both bounds are exact in f64.
                    let min = <$dst>::MIN as f64;
                    if rounded < min || rounded >= -min {
                        return Err(out_of_range(self, to));
                    }
                    Ok(rounded as $dst)
                }
            }
        )+
    };
}

float_to_int!(f32 => i8, i16, i32, i64);
float_to_int!(f64 => i8, i16, i32, i64);

/// Registry of numeric converters keyed by `(source, destination)` column type.
///
/// [`ConverterTable::default`] registers every pair of numeric types. An empty
/// table from [`ConverterTable::new`] can be filled selectively.
pub struct ConverterTable {
    converters: HashMap<(ColumnType, ColumnType), Box<dyn Any + Send + Sync>>,
}

impl fmt::Debug for ConverterTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pairs: Vec<_> = self.converters.keys().collect();
        pairs.sort_by_key(|(from, to)| (from.tag(), to.tag()));
        f.debug_struct("ConverterTable").field("pairs", &pairs).finish()
    }
}

macro_rules! register_from {
    ($table:expr, $src:ty => $($dst:ty),+) => {
        $(
            $table.register::<$src, $dst>(<$src as NumericCast<$dst>>::cast);
        )+
    };
}

impl Default for ConverterTable {
    fn default() -> Self {
        let mut table = Self::new();
        register_from!(table, i8 => i8, i16, i32, i64, f32, f64);
        register_from!(table, i16 => i8, i16, i32, i64, f32, f64);
        register_from!(table, i32 => i8, i16, i32, i64, f32, f64);
        register_from!(table, i64 => i8, i16, i32, i64, f32, f64);
        register_from!(table, f32 => i8, i16, i32, i64, f32, f64);
        register_from!(table, f64 => i8, i16, i32, i64, f32, f64);
        table
    }
}

impl ConverterTable {
    pub fn new() -> Self {
        Self {
            converters: HashMap::new(),
        }
    }

    pub fn register<S: NumericElement, D: NumericElement>(&mut self, converter: Converter<S, D>) {
        self.converters
            .insert((S::COLUMN_TYPE, D::COLUMN_TYPE), Box::new(converter));
    }

    pub fn supports(&self, from: ColumnType, to: ColumnType) -> bool {
        self.converters.contains_key(&(from, to))
    }

    pub fn get<S: ColumnElement, D: ColumnElement>(&self) -> Result<Converter<S, D>, ConversionError> {
        let unsupported = ConversionError::Unsupported {
            from: S::COLUMN_TYPE,
            to: D::COLUMN_TYPE,
        };
        self.converters
            .get(&(S::COLUMN_TYPE, D::COLUMN_TYPE))
            .and_then(|converter| converter.downcast_ref::<Converter<S, D>>())
            .copied()
            .ok_or(unsupported)
    }
}
