//! Typed operator attributes.
//!
//! Attributes are stored as a closed set of tagged values. Op definitions declare the
//! expected [`AttrType`] (and optionally a default), and callbacks read them back through
//! [`AttrKind`], which fails with a configuration error instead of panicking on a type
//! mismatch.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::tensor::{DataType, Shape};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttrValue {
    Int32(i32),
    Int64(i64),
    Bool(bool),
    Float(f32),
    Double(f64),
    String(String),
    Shape(Shape),
    DataType(DataType),
    ListInt32(Vec<i32>),
    ListInt64(Vec<i64>),
    ListFloat(Vec<f32>),
    ListShape(Vec<Shape>),
    ListDataType(Vec<DataType>),
    ListString(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrType {
    Int32,
    Int64,
    Bool,
    Float,
    Double,
    String,
    Shape,
    DataType,
    ListInt32,
    ListInt64,
    ListFloat,
    ListShape,
    ListDataType,
    ListString,
}

impl AttrValue {
    pub fn attr_type(&self) -> AttrType {
        match self {
            AttrValue::Int32(_) => AttrType::Int32,
            AttrValue::Int64(_) => AttrType::Int64,
            AttrValue::Bool(_) => AttrType::Bool,
            AttrValue::Float(_) => AttrType::Float,
            AttrValue::Double(_) => AttrType::Double,
            AttrValue::String(_) => AttrType::String,
            AttrValue::Shape(_) => AttrType::Shape,
            AttrValue::DataType(_) => AttrType::DataType,
            AttrValue::ListInt32(_) => AttrType::ListInt32,
            AttrValue::ListInt64(_) => AttrType::ListInt64,
            AttrValue::ListFloat(_) => AttrType::ListFloat,
            AttrValue::ListShape(_) => AttrType::ListShape,
            AttrValue::ListDataType(_) => AttrType::ListDataType,
            AttrValue::ListString(_) => AttrType::ListString,
        }
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttrType::Int32 => "int32",
            AttrType::Int64 => "int64",
            AttrType::Bool => "bool",
            AttrType::Float => "float",
            AttrType::Double => "double",
            AttrType::String => "string",
            AttrType::Shape => "shape",
            AttrType::DataType => "data_type",
            AttrType::ListInt32 => "list<int32>",
            AttrType::ListInt64 => "list<int64>",
            AttrType::ListFloat => "list<float>",
            AttrType::ListShape => "list<shape>",
            AttrType::ListDataType => "list<data_type>",
            AttrType::ListString => "list<string>",
        };
        f.write_str(name)
    }
}

/// Rust types that can be stored as an attribute.
pub trait AttrKind: Sized {
    const TYPE: AttrType;

    fn from_value(value: &AttrValue) -> Option<Self>;

    fn into_value(self) -> AttrValue;
}

macro_rules! impl_attr_kind {
    ($ty:ty, $variant:ident) => {
        impl AttrKind for $ty {
            const TYPE: AttrType = AttrType::$variant;

            fn from_value(value: &AttrValue) -> Option<Self> {
                match value {
                    AttrValue::$variant(inner) => Some(inner.clone()),
                    _ => None,
                }
            }

            fn into_value(self) -> AttrValue {
                AttrValue::$variant(self)
            }
        }

        impl From<$ty> for AttrValue {
            fn from(value: $ty) -> Self {
                AttrValue::$variant(value)
            }
        }
    };
}

impl_attr_kind!(i32, Int32);
impl_attr_kind!(i64, Int64);
impl_attr_kind!(bool, Bool);
impl_attr_kind!(f32, Float);
impl_attr_kind!(f64, Double);
impl_attr_kind!(String, String);
impl_attr_kind!(Shape, Shape);
impl_attr_kind!(DataType, DataType);
impl_attr_kind!(Vec<i32>, ListInt32);
impl_attr_kind!(Vec<i64>, ListInt64);
impl_attr_kind!(Vec<f32>, ListFloat);
impl_attr_kind!(Vec<Shape>, ListShape);
impl_attr_kind!(Vec<DataType>, ListDataType);
impl_attr_kind!(Vec<String>, ListString);

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::String(value.to_string())
    }
}

/// Attribute values of one operator instance, keyed by attribute name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttrMap {
    values: BTreeMap<String, AttrValue>,
}

impl AttrMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn value(&self, name: &str) -> Option<&AttrValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Reads `name` as `T`. `op` is only used to label the error.
    pub fn get<T: AttrKind>(&self, op: &str, name: &str) -> Result<T, ConfigError> {
        let value = self.values.get(name).ok_or_else(|| ConfigError::MissingAttr {
            op: op.to_string(),
            name: name.to_string(),
        })?;
        T::from_value(value).ok_or_else(|| ConfigError::AttrType {
            op: op.to_string(),
            name: name.to_string(),
            expected: T::TYPE,
            actual: value.attr_type(),
        })
    }
}
