//! # Encoding Module
//!
//! Byte-level helpers shared by the encoders, the decoder and the loopback
//! engine:
//!
//! - **Little-endian primitives**: `PutLe` writers and the bounds-checked `ByteReader`
//! - **Compression**: raw deflate for long strings
//! - **Checksums**: CRC-32 trailers and xxh64 content hashes

pub mod checksum;
pub mod compress;
pub mod le;

pub use checksum::{crc32, hash64};
pub use le::{patch_u32, ByteReader, PutLe};
