//! Enumerates the scalar element types a tensor header can carry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical element type recorded in tensor headers and inferred per operator output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Placeholder for headers whose type has not been inferred yet.
    #[default]
    Invalid,
    Char,
    Float,
    Double,
    Int8,
    Int32,
    Int64,
    UInt8,
    Float16,
}

impl DataType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DataType::Invalid => 0,
            DataType::Char | DataType::Int8 | DataType::UInt8 => 1,
            DataType::Float16 => 2,
            DataType::Float | DataType::Int32 => 4,
            DataType::Double | DataType::Int64 => 8,
        }
    }

    pub fn is_valid(self) -> bool {
        self != DataType::Invalid
    }

    pub fn is_floating(self) -> bool {
        matches!(
            self,
            DataType::Float | DataType::Double | DataType::Float16
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Invalid => "invalid",
            DataType::Char => "char",
            DataType::Float => "float32",
            DataType::Double => "float64",
            DataType::Int8 => "int8",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt8 => "uint8",
            DataType::Float16 => "float16",
        };
        f.write_str(name)
    }
}
