#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a column, as recorded by the tag byte in the table header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ColumnType {
    Boolean = 1,
    SByte = 2,
    Short = 3,
    Int = 4,
    Long = 5,
    Float = 6,
    Double = 7,
    String = 8,
    Date = 9,
    IndexList = 10,
    WeightedIndexList = 11,
    Vector = 12,
    Matrix = 13,
    Tensor3D = 14,
    Tensor4D = 15,
}

impl ColumnType {
    pub const ALL: [ColumnType; 15] = [
        ColumnType::Boolean,
        ColumnType::SByte,
        ColumnType::Short,
        ColumnType::Int,
        ColumnType::Long,
        ColumnType::Float,
        ColumnType::Double,
        ColumnType::String,
        ColumnType::Date,
        ColumnType::IndexList,
        ColumnType::WeightedIndexList,
        ColumnType::Vector,
        ColumnType::Matrix,
        ColumnType::Tensor3D,
        ColumnType::Tensor4D,
    ];

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| *t as u8 == tag)
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Byte width of one element in a fixed-stride column, or `None` for
    /// variable-length (encoded stream) columns.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            ColumnType::Boolean | ColumnType::SByte => Some(1),
            ColumnType::Short => Some(2),
            ColumnType::Int | ColumnType::Float => Some(4),
            ColumnType::Long | ColumnType::Double | ColumnType::Date => Some(8),
            ColumnType::String
            | ColumnType::IndexList
            | ColumnType::WeightedIndexList
            | ColumnType::Vector
            | ColumnType::Matrix
            | ColumnType::Tensor3D
            | ColumnType::Tensor4D => None,
        }
    }

    /// Element size as written in a column descriptor: 0 for encoded types.
    pub fn element_size(self) -> usize {
        self.fixed_size().unwrap_or(0)
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ColumnType::SByte
                | ColumnType::Short
                | ColumnType::Int
                | ColumnType::Long
                | ColumnType::Float
                | ColumnType::Double
        )
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ColumnType::SByte | ColumnType::Short | ColumnType::Int | ColumnType::Long
        )
    }

    pub fn is_tensor(self) -> bool {
        matches!(
            self,
            ColumnType::Vector | ColumnType::Matrix | ColumnType::Tensor3D | ColumnType::Tensor4D
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Boolean => "Boolean",
            ColumnType::SByte => "SByte",
            ColumnType::Short => "Short",
            ColumnType::Int => "Int",
            ColumnType::Long => "Long",
            ColumnType::Float => "Float",
            ColumnType::Double => "Double",
            ColumnType::String => "String",
            ColumnType::Date => "Date",
            ColumnType::IndexList => "IndexList",
            ColumnType::WeightedIndexList => "WeightedIndexList",
            ColumnType::Vector => "Vector",
            ColumnType::Matrix => "Matrix",
            ColumnType::Tensor3D => "Tensor3D",
            ColumnType::Tensor4D => "Tensor4D",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Run `$body` with `$t` bound to the Rust element type stored by `$column_type`.
///
/// This is the tag -> typed component dispatch table: every place that has to
/// specialise on a column type known only at runtime goes through here, so
/// adding a type means adding one arm.
#[macro_export]
macro_rules! dispatch_column_type {
    ($column_type:expr, $t:ident => $body:expr) => {
        match $column_type {
            $crate::ColumnType::Boolean => {
                type $t = bool;
                $body
            }
            $crate::ColumnType::SByte => {
                type $t = i8;
                $body
            }
            $crate::ColumnType::Short => {
                type $t = i16;
                $body
            }
            $crate::ColumnType::Int => {
                type $t = i32;
                $body
            }
            $crate::ColumnType::Long => {
                type $t = i64;
                $body
            }
            $crate::ColumnType::Float => {
                type $t = f32;
                $body
            }
            $crate::ColumnType::Double => {
                type $t = f64;
                $body
            }
            $crate::ColumnType::String => {
                type $t = ::std::string::String;
                $body
            }
            $crate::ColumnType::Date => {
                type $t = $crate::chrono::NaiveDateTime;
                $body
            }
            $crate::ColumnType::IndexList => {
                type $t = $crate::IndexList;
                $body
            }
            $crate::ColumnType::WeightedIndexList => {
                type $t = $crate::WeightedIndexList;
                $body
            }
            $crate::ColumnType::Vector => {
                type $t = $crate::FloatVector;
                $body
            }
            $crate::ColumnType::Matrix => {
                type $t = $crate::FloatMatrix;
                $body
            }
            $crate::ColumnType::Tensor3D => {
                type $t = $crate::FloatTensor3D;
                $body
            }
            $crate::ColumnType::Tensor4D => {
                type $t = $crate::FloatTensor4D;
                $body
            }
        }
    };
}

/// Same as [`dispatch_column_type!`] restricted to numeric columns; `$other` is
/// evaluated for everything else.
#[macro_export]
macro_rules! dispatch_numeric_type {
    ($column_type:expr, $t:ident => $body:expr, $other:expr) => {
        match $column_type {
            $crate::ColumnType::SByte => {
                type $t = i8;
                $body
            }
            $crate::ColumnType::Short => {
                type $t = i16;
                $body
            }
            $crate::ColumnType::Int => {
                type $t = i32;
                $body
            }
            $crate::ColumnType::Long => {
                type $t = i64;
                $body
            }
            $crate::ColumnType::Float => {
                type $t = f32;
                $body
            }
            $crate::ColumnType::Double => {
                type $t = f64;
                $body
            }
            _ => $other,
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for t in ColumnType::ALL {
            assert_eq!(ColumnType::from_tag(t.tag()), Some(t));
        }
        assert_eq!(ColumnType::from_tag(0), None);
        assert_eq!(ColumnType::from_tag(16), None);
    }

    #[test]
    fn encoded_types_have_zero_element_size() {
        assert_eq!(ColumnType::String.element_size(), 0);
        assert_eq!(ColumnType::Vector.element_size(), 0);
        assert_eq!(ColumnType::Date.element_size(), 8);
        assert_eq!(ColumnType::Boolean.element_size(), 1);
    }
}
