//! # Typed Vectors
//!
//! Vector and colvec fields store a flat array of one numeric base type. The
//! base type is fixed by the schema, so the wire bytes carry no per-element
//! tags: a vector is `size * base.width()` little-endian bytes, possibly
//! truncated to fewer elements but never padded on the separate path.

use serde::{Deserialize, Serialize};

use super::Value;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBase {
    Int8 = 0,
    Uint8 = 1,
    Int16 = 2,
    Uint16 = 3,
    Int32 = 4,
    Uint32 = 5,
    Float32 = 6,
    Float64 = 7,
}

impl VectorBase {
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0 => VectorBase::Int8,
            1 => VectorBase::Uint8,
            2 => VectorBase::Int16,
            3 => VectorBase::Uint16,
            4 => VectorBase::Int32,
            5 => VectorBase::Uint32,
            6 => VectorBase::Float32,
            7 => VectorBase::Float64,
            _ => return None,
        })
    }

    #[inline]
    pub fn width(self) -> usize {
        match self {
            VectorBase::Int8 | VectorBase::Uint8 => 1,
            VectorBase::Int16 | VectorBase::Uint16 => 2,
            VectorBase::Int32 | VectorBase::Uint32 | VectorBase::Float32 => 4,
            VectorBase::Float64 => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedVector {
    Int8(Vec<i8>),
    Uint8(Vec<u8>),
    Int16(Vec<i16>),
    Uint16(Vec<u16>),
    Int32(Vec<i32>),
    Uint32(Vec<u32>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

macro_rules! per_base {
    ($self:expr, $v:ident => $body:expr) => {
        match $self {
            TypedVector::Int8($v) => $body,
            TypedVector::Uint8($v) => $body,
            TypedVector::Int16($v) => $body,
            TypedVector::Uint16($v) => $body,
            TypedVector::Int32($v) => $body,
            TypedVector::Uint32($v) => $body,
            TypedVector::Float32($v) => $body,
            TypedVector::Float64($v) => $body,
        }
    };
}

impl TypedVector {
    pub fn zeroed(base: VectorBase, len: usize) -> Self {
        match base {
            VectorBase::Int8 => TypedVector::Int8(vec![0; len]),
            VectorBase::Uint8 => TypedVector::Uint8(vec![0; len]),
            VectorBase::Int16 => TypedVector::Int16(vec![0; len]),
            VectorBase::Uint16 => TypedVector::Uint16(vec![0; len]),
            VectorBase::Int32 => TypedVector::Int32(vec![0; len]),
            VectorBase::Uint32 => TypedVector::Uint32(vec![0; len]),
            VectorBase::Float32 => TypedVector::Float32(vec![0.0; len]),
            VectorBase::Float64 => TypedVector::Float64(vec![0.0; len]),
        }
    }

    pub fn base(&self) -> VectorBase {
        match self {
            TypedVector::Int8(_) => VectorBase::Int8,
            TypedVector::Uint8(_) => VectorBase::Uint8,
            TypedVector::Int16(_) => VectorBase::Int16,
            TypedVector::Uint16(_) => VectorBase::Uint16,
            TypedVector::Int32(_) => VectorBase::Int32,
            TypedVector::Uint32(_) => VectorBase::Uint32,
            TypedVector::Float32(_) => VectorBase::Float32,
            TypedVector::Float64(_) => VectorBase::Float64,
        }
    }

    pub fn len(&self) -> usize {
        per_base!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuilds a vector from its little-endian element bytes. Returns `None`
    /// when the byte count is not a multiple of the element width.
    pub fn from_le_bytes(base: VectorBase, bytes: &[u8]) -> Option<Self> {
        let width = base.width();
        if bytes.len() % width != 0 {
            return None;
        }
        let chunks = bytes.chunks_exact(width);
        Some(match base {
            VectorBase::Int8 => TypedVector::Int8(bytes.iter().map(|&b| b as i8).collect()),
            VectorBase::Uint8 => TypedVector::Uint8(bytes.to_vec()),
            VectorBase::Int16 => {
                TypedVector::Int16(chunks.map(|c| i16::from_le_bytes([c[0], c[1]])).collect())
            }
            VectorBase::Uint16 => {
                TypedVector::Uint16(chunks.map(|c| u16::from_le_bytes([c[0], c[1]])).collect())
            }
            VectorBase::Int32 => TypedVector::Int32(
                chunks
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            VectorBase::Uint32 => TypedVector::Uint32(
                chunks
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            VectorBase::Float32 => TypedVector::Float32(
                chunks
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            VectorBase::Float64 => TypedVector::Float64(
                chunks
                    .map(|c| {
                        let mut raw = [0u8; 8];
                        raw.copy_from_slice(c);
                        f64::from_le_bytes(raw)
                    })
                    .collect(),
            ),
        })
    }

    /// Appends at most `limit` elements as little-endian bytes.
    pub fn write_le(&self, limit: usize, out: &mut Vec<u8>) {
        per_base!(self, v => {
            for x in v.iter().take(limit) {
                out.extend_from_slice(&x.to_le_bytes());
            }
        })
    }

    pub fn encoded_len(&self, limit: usize) -> usize {
        self.len().min(limit) * self.base().width()
    }

    /// Converts every element into `base`, saturating integer conversions.
    pub fn cast(&self, base: VectorBase) -> TypedVector {
        if self.base() == base {
            return self.clone();
        }
        let floats: Vec<f64> = self.to_f64();
        Self::from_f64s(base, &floats)
    }

    pub fn to_f64(&self) -> Vec<f64> {
        per_base!(self, v => v.iter().map(|&x| x as f64).collect())
    }

    pub fn to_f32(&self) -> Vec<f32> {
        per_base!(self, v => v.iter().map(|&x| x as f32).collect())
    }

    pub fn from_f64s(base: VectorBase, values: &[f64]) -> TypedVector {
        let it = values.iter().copied();
        match base {
            VectorBase::Int8 => TypedVector::Int8(it.map(|x| x as i8).collect()),
            VectorBase::Uint8 => TypedVector::Uint8(it.map(|x| x as u8).collect()),
            VectorBase::Int16 => TypedVector::Int16(it.map(|x| x as i16).collect()),
            VectorBase::Uint16 => TypedVector::Uint16(it.map(|x| x as u16).collect()),
            VectorBase::Int32 => TypedVector::Int32(it.map(|x| x as i32).collect()),
            VectorBase::Uint32 => TypedVector::Uint32(it.map(|x| x as u32).collect()),
            VectorBase::Float32 => TypedVector::Float32(it.map(|x| x as f32).collect()),
            VectorBase::Float64 => TypedVector::Float64(it.collect()),
        }
    }

    /// Builds a vector from a list of numeric values. Non-numeric members
    /// make the whole list unrepresentable.
    pub fn from_values(base: VectorBase, values: &[Value]) -> Option<TypedVector> {
        let floats = values
            .iter()
            .map(Value::as_f64)
            .collect::<Option<Vec<f64>>>()?;
        Some(Self::from_f64s(base, &floats))
    }
}

impl From<Vec<f32>> for TypedVector {
    fn from(v: Vec<f32>) -> Self {
        TypedVector::Float32(v)
    }
}

impl From<Vec<f64>> for TypedVector {
    fn from(v: Vec<f64>) -> Self {
        TypedVector::Float64(v)
    }
}

impl From<Vec<u8>> for TypedVector {
    fn from(v: Vec<u8>) -> Self {
        TypedVector::Uint8(v)
    }
}

impl From<Vec<i32>> for TypedVector {
    fn from(v: Vec<i32>) -> Self {
        TypedVector::Int32(v)
    }
}
