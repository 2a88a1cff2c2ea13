//! # Configuration Module
//!
//! Centralizes the constants shared by the schema compiler, the mutation
//! encoder, the query compiler and the decoder. Several of them are part of
//! the wire format (markers, reserved field numbers), so they live in one
//! place with their interdependencies asserted at compile time.
//!
//! - [`constants`]: numeric limits, buffer sizes and wire markers

pub mod constants;
pub use constants::*;
