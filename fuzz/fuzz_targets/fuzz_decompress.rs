//! Fuzz target for bus payload decoding.
//!
//! `decode` must never panic on arbitrary input, and framing must be
//! transparent for any payload.

#![no_main]

use libfuzzer_sys::fuzz_target;
use region_sync::payload::{compute_content_hash, decode, encode, maybe_decompress};

fuzz_target!(|data: &[u8]| {
    let _ = maybe_decompress(data);
    let _ = decode(data, Some("00"));

    let hash = compute_content_hash(data);
    let encoded = encode(data, Some(64));
    assert_eq!(decode(&encoded, Some(&hash)).unwrap(), data);
});
