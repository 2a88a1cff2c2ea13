//! Checksums and content hashes used on the wire.
//!
//! - CRC-32 (ISO-HDLC) trails every binary payload.
//! - xxh64 with [`HASH_SEED`] identifies schemas, long filter values and
//!   cardinality members.

use crc::{Crc, CRC_32_ISO_HDLC};
use xxhash_rust::xxh64::xxh64;

use crate::config::HASH_SEED;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[inline]
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

#[inline]
pub fn hash64(data: &[u8]) -> u64 {
    xxh64(data, HASH_SEED)
}
