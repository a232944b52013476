//! Record shapes and typed record buffers.
//!
//! Every record store holds fixed-shape records: `dimension` scalars of one
//! [`BaseType`]. [`Records`] is a flat, typed buffer of such records; it is
//! what writers hand in and readers get back, converted to whatever base
//! type the caller asks for.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseType {
    Int,
    Float,
    Double,
    Char,
}

impl BaseType {
    /// Size in bytes of one scalar.
    pub fn size(self) -> usize {
        match self {
            BaseType::Int | BaseType::Float => 4,
            BaseType::Double => 8,
            BaseType::Char => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BaseType::Int => "int",
            BaseType::Float => "float",
            BaseType::Double => "double",
            BaseType::Char => "char",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "int" => Some(BaseType::Int),
            "float" => Some(BaseType::Float),
            "double" => Some(BaseType::Double),
            "char" => Some(BaseType::Char),
            _ => None,
        }
    }
}

/// Shape of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Datatype {
    pub base: BaseType,
    pub dimension: usize,
}

impl Datatype {
    pub fn new(base: BaseType, dimension: usize) -> Self {
        Self { base, dimension }
    }

    /// Size in bytes of one record.
    pub fn element_size(&self) -> usize {
        self.base.size() * self.dimension
    }

    /// Same dimension, different base type.
    pub fn with_base(&self, base: BaseType) -> Self {
        Self::new(base, self.dimension)
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.base.name(), self.dimension)
    }
}

/// Flat scalar storage for one base type.
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    Int(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Char(Vec<i8>),
}

impl Values {
    pub fn empty(base: BaseType) -> Self {
        match base {
            BaseType::Int => Values::Int(Vec::new()),
            BaseType::Float => Values::Float(Vec::new()),
            BaseType::Double => Values::Double(Vec::new()),
            BaseType::Char => Values::Char(Vec::new()),
        }
    }

    pub fn base(&self) -> BaseType {
        match self {
            Values::Int(_) => BaseType::Int,
            Values::Float(_) => BaseType::Float,
            Values::Double(_) => BaseType::Double,
            Values::Char(_) => BaseType::Char,
        }
    }

    /// Number of scalars.
    pub fn len(&self) -> usize {
        match self {
            Values::Int(v) => v.len(),
            Values::Float(v) => v.len(),
            Values::Double(v) => v.len(),
            Values::Char(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widening or narrowing `as` conversion; precision loss is not reported.
    pub fn convert(&self, base: BaseType) -> Values {
        macro_rules! cast {
            ($src:expr) => {
                match base {
                    BaseType::Int => Values::Int($src.iter().map(|&x| x as i32).collect()),
                    BaseType::Float => Values::Float($src.iter().map(|&x| x as f32).collect()),
                    BaseType::Double => Values::Double($src.iter().map(|&x| x as f64).collect()),
                    BaseType::Char => Values::Char($src.iter().map(|&x| x as i8).collect()),
                }
            };
        }
        if base == self.base() {
            return self.clone();
        }
        match self {
            Values::Int(v) => cast!(v),
            Values::Float(v) => cast!(v),
            Values::Double(v) => cast!(v),
            Values::Char(v) => cast!(v),
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Values::Int(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            Values::Float(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            Values::Double(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            Values::Char(v) => out.extend(v.iter().map(|&x| x as u8)),
        }
    }

    fn decode(base: BaseType, bytes: &[u8]) -> Values {
        match base {
            BaseType::Int => Values::Int(
                bytes
                    .chunks_exact(4)
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            BaseType::Float => Values::Float(
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            BaseType::Double => Values::Double(
                bytes
                    .chunks_exact(8)
                    .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
            BaseType::Char => Values::Char(bytes.iter().map(|&b| b as i8).collect()),
        }
    }

    fn append(&mut self, other: &Values) -> bool {
        match (self, other) {
            (Values::Int(a), Values::Int(b)) => a.extend_from_slice(b),
            (Values::Float(a), Values::Float(b)) => a.extend_from_slice(b),
            (Values::Double(a), Values::Double(b)) => a.extend_from_slice(b),
            (Values::Char(a), Values::Char(b)) => a.extend_from_slice(b),
            _ => return false,
        }
        true
    }

    fn clear(&mut self) {
        match self {
            Values::Int(v) => v.clear(),
            Values::Float(v) => v.clear(),
            Values::Double(v) => v.clear(),
            Values::Char(v) => v.clear(),
        }
    }
}

impl From<Vec<i32>> for Values {
    fn from(v: Vec<i32>) -> Self {
        Values::Int(v)
    }
}

impl From<Vec<f32>> for Values {
    fn from(v: Vec<f32>) -> Self {
        Values::Float(v)
    }
}

impl From<Vec<f64>> for Values {
    fn from(v: Vec<f64>) -> Self {
        Values::Double(v)
    }
}

impl From<Vec<i8>> for Values {
    fn from(v: Vec<i8>) -> Self {
        Values::Char(v)
    }
}

/// A run of fixed-shape records stored as one flat scalar buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Records {
    dimension: usize,
    values: Values,
}

impl Records {
    /// Empty buffer of the given shape.
    pub fn new(datatype: Datatype) -> Self {
        Self {
            dimension: datatype.dimension,
            values: Values::empty(datatype.base),
        }
    }

    /// Wraps `values` as records of `dimension` scalars each.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` when `dimension` is zero or does not divide
    /// the number of scalars.
    pub fn from_values(dimension: usize, values: impl Into<Values>) -> Result<Self> {
        let values = values.into();
        if dimension == 0 || values.len() % dimension != 0 {
            return Err(Error::ShapeMismatch {
                expected: format!("multiple of {dimension} scalars"),
                found: format!("{} scalars", values.len()),
                context: "records".to_string(),
            });
        }
        Ok(Self { dimension, values })
    }

    /// Decodes little-endian bytes as records of `datatype`.
    ///
    /// # Errors
    ///
    /// Returns `Corrupt` when `bytes` is not a whole number of records.
    pub fn from_le_bytes(datatype: Datatype, bytes: &[u8]) -> Result<Self> {
        let element_size = datatype.element_size();
        if element_size == 0 || bytes.len() % element_size != 0 {
            return Err(Error::Corrupt("partial record in array"));
        }
        Ok(Self {
            dimension: datatype.dimension,
            values: Values::decode(datatype.base, bytes),
        })
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_len());
        self.values.encode_into(&mut out);
        out
    }

    pub fn datatype(&self) -> Datatype {
        Datatype::new(self.values.base(), self.dimension)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.values.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn byte_len(&self) -> usize {
        self.values.len() * self.values.base().size()
    }

    /// Same records with scalars cast to `base`.
    pub fn convert(&self, base: BaseType) -> Records {
        Records {
            dimension: self.dimension,
            values: self.values.convert(base),
        }
    }

    /// Appends `other`, which must have the same shape.
    pub fn extend(&mut self, other: &Records) -> Result<()> {
        if other.dimension != self.dimension || !self.values.append(&other.values) {
            return Err(Error::ShapeMismatch {
                expected: self.datatype().to_string(),
                found: other.datatype().to_string(),
                context: "record concatenation".to_string(),
            });
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Scalars as `f64` when the base type is `Double`.
    pub fn as_doubles(&self) -> Option<&[f64]> {
        match &self.values {
            Values::Double(v) => Some(v),
            _ => None,
        }
    }

    /// Scalars as `i32` when the base type is `Int`.
    pub fn as_ints(&self) -> Option<&[i32]> {
        match &self.values {
            Values::Int(v) => Some(v),
            _ => None,
        }
    }
}
