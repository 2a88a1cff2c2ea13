//! # Type Tags
//!
//! `TypeTag` is the closed set of field types understood by the codec. The
//! discriminants are part of the wire format: they appear in cursors, packed
//! schema descriptors, filter conditions and sort specs, and must never be
//! renumbered.
//!
//! ## Discriminant Values
//!
//! | Tag | Code | Main width |
//! |-----|------|------------|
//! | null | 0 | - |
//! | timestamp | 1 | 8 (i64 ms) |
//! | number | 4 | 8 (f64) |
//! | cardinality | 5 | separate |
//! | uint8 | 6 | 1 |
//! | uint32 | 7 | 4 |
//! | boolean | 9 | 1 |
//! | enum | 10 | 1 |
//! | string | 11 | separate, or `max_bytes + 1` |
//! | text | 12 | separate |
//! | reference | 13 | separate |
//! | references | 14 | separate |
//! | microbuffer | 17 | declared size |
//! | alias | 18 | separate |
//! | aliases | 19 | not definable |
//! | int8 | 20 | 1 |
//! | int16 | 21 | 2 |
//! | uint16 | 22 | 2 |
//! | int32 | 23 | 4 |
//! | binary | 25 | separate |
//! | vector | 27 | separate, or declared bytes |
//! | json | 28 | separate |
//! | object | 29 | no storage |
//! | colvec | 30 | separate |
//! | id | 255 | record id |

use serde::{Deserialize, Serialize};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    Null = 0,
    Timestamp = 1,
    Number = 4,
    Cardinality = 5,
    Uint8 = 6,
    Uint32 = 7,
    Boolean = 9,
    Enum = 10,
    String = 11,
    Text = 12,
    Reference = 13,
    References = 14,
    MicroBuffer = 17,
    Alias = 18,
    Aliases = 19,
    Int8 = 20,
    Int16 = 21,
    Uint16 = 22,
    Int32 = 23,
    Binary = 25,
    Vector = 27,
    Json = 28,
    Object = 29,
    Colvec = 30,
    Id = 255,
}

impl TypeTag {
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0 => TypeTag::Null,
            1 => TypeTag::Timestamp,
            4 => TypeTag::Number,
            5 => TypeTag::Cardinality,
            6 => TypeTag::Uint8,
            7 => TypeTag::Uint32,
            9 => TypeTag::Boolean,
            10 => TypeTag::Enum,
            11 => TypeTag::String,
            12 => TypeTag::Text,
            13 => TypeTag::Reference,
            14 => TypeTag::References,
            17 => TypeTag::MicroBuffer,
            18 => TypeTag::Alias,
            19 => TypeTag::Aliases,
            20 => TypeTag::Int8,
            21 => TypeTag::Int16,
            22 => TypeTag::Uint16,
            23 => TypeTag::Int32,
            25 => TypeTag::Binary,
            27 => TypeTag::Vector,
            28 => TypeTag::Json,
            29 => TypeTag::Object,
            30 => TypeTag::Colvec,
            255 => TypeTag::Id,
            _ => return None,
        })
    }

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Width of the type when it always lives in the main region.
    ///
    /// Strings, vectors and micro-buffers can also be main fields, but their
    /// width depends on the declaration and is computed by the schema compiler.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            TypeTag::Timestamp | TypeTag::Number => Some(8),
            TypeTag::Int8 | TypeTag::Uint8 | TypeTag::Boolean | TypeTag::Enum => Some(1),
            TypeTag::Int16 | TypeTag::Uint16 => Some(2),
            TypeTag::Int32 | TypeTag::Uint32 => Some(4),
            _ => None,
        }
    }

    /// Numeric types usable in range filters and aggregates.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            TypeTag::Timestamp
                | TypeTag::Number
                | TypeTag::Int8
                | TypeTag::Uint8
                | TypeTag::Int16
                | TypeTag::Uint16
                | TypeTag::Int32
                | TypeTag::Uint32
        )
    }

    pub fn is_reference(self) -> bool {
        matches!(self, TypeTag::Reference | TypeTag::References)
    }

    /// Tags a schema definition may declare for a leaf property.
    pub fn is_definable(self) -> bool {
        !matches!(
            self,
            TypeTag::Null | TypeTag::Id | TypeTag::Aliases | TypeTag::Object
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Null => "null",
            TypeTag::Timestamp => "timestamp",
            TypeTag::Number => "number",
            TypeTag::Cardinality => "cardinality",
            TypeTag::Uint8 => "uint8",
            TypeTag::Uint32 => "uint32",
            TypeTag::Boolean => "boolean",
            TypeTag::Enum => "enum",
            TypeTag::String => "string",
            TypeTag::Text => "text",
            TypeTag::Reference => "reference",
            TypeTag::References => "references",
            TypeTag::MicroBuffer => "microbuffer",
            TypeTag::Alias => "alias",
            TypeTag::Aliases => "aliases",
            TypeTag::Int8 => "int8",
            TypeTag::Int16 => "int16",
            TypeTag::Uint16 => "uint16",
            TypeTag::Int32 => "int32",
            TypeTag::Binary => "binary",
            TypeTag::Vector => "vector",
            TypeTag::Json => "json",
            TypeTag::Object => "object",
            TypeTag::Colvec => "colvec",
            TypeTag::Id => "id",
        }
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
