//! # Types Module
//!
//! The closed type system of the codec:
//!
//! - [`TypeTag`]: stable numeric tag of every field type
//! - [`VectorBase`] / [`TypedVector`]: numeric arrays for vector fields
//! - [`Value`]: owned payload and result values

mod type_tag;
mod value;
mod vector;

pub use type_tag::TypeTag;
pub use value::Value;
pub use vector::{TypedVector, VectorBase};
