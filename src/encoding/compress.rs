//! # String Compression
//!
//! Long strings are stored as raw deflate streams (no zlib or gzip framing).
//! The original length travels next to the compressed bytes so the decoder
//! can inflate straight into an arena slice of the right size.

use std::io::{Read, Write};

use eyre::{Result, WrapErr};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::config::MAX_MODIFY_SIZE;

/// Upper bound of deflate's output-to-input ratio.
pub const MAX_INFLATE_RATIO: usize = 1032;

/// Whether `compressed` bytes can inflate to `original_len` bytes. Lengths
/// read from untrusted bytes are checked with this before any allocation.
pub fn plausible_len(compressed: usize, original_len: usize) -> bool {
    original_len <= MAX_MODIFY_SIZE && original_len <= compressed.saturating_mul(MAX_INFLATE_RATIO)
}

pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .wrap_err("failed to deflate string payload")?;
    encoder.finish().wrap_err("failed to finish deflate stream")
}

/// Inflates into `out`, which must be exactly the original length.
/// Returns `false` when the stream is corrupt or has a different length.
pub fn inflate_into(data: &[u8], out: &mut [u8]) -> bool {
    let mut decoder = DeflateDecoder::new(data);
    if decoder.read_exact(out).is_err() {
        return false;
    }
    let mut extra = [0u8; 1];
    matches!(decoder.read(&mut extra), Ok(0))
}

pub fn inflate(data: &[u8], original_len: usize) -> Option<Vec<u8>> {
    if !plausible_len(data.len(), original_len) {
        return None;
    }
    let mut out = vec![0u8; original_len];
    inflate_into(data, &mut out).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inflate_restores_original_bytes() {
        let text = "the quick brown fox ".repeat(40);
        let packed = deflate(text.as_bytes()).unwrap();
        assert!(packed.len() < text.len());
        assert_eq!(inflate(&packed, text.len()).unwrap(), text.as_bytes());
    }

    #[test]
    fn inflate_rejects_wrong_length() {
        let packed = deflate(b"abcabcabcabc").unwrap();
        assert!(inflate(&packed, 5).is_none());
        assert!(inflate(&packed, 20).is_none());
    }

    #[test]
    fn implausible_lengths_are_refused_before_allocating() {
        assert!(plausible_len(10, 10 * MAX_INFLATE_RATIO));
        assert!(!plausible_len(10, 10 * MAX_INFLATE_RATIO + 1));
        assert!(!plausible_len(0, 1));
        assert!(!plausible_len(usize::MAX, MAX_MODIFY_SIZE + 1));
        assert!(inflate(&[], u32::MAX as usize).is_none());
    }

    #[test]
    fn inflate_rejects_garbage() {
        assert!(inflate(&[0xff, 0xfe, 0xfd], 4).is_none());
    }
}
