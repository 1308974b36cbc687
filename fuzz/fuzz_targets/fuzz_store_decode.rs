//! Fuzz target for decoding the persisted observation records.
//!
//! Arbitrary JSON must decode or fail cleanly. Whatever decodes must
//! re-encode and decode to the same records.

#![no_main]

use libfuzzer_sys::fuzz_target;
use msu_telemetry::{decode_records, encode_records};

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let Ok(records) = decode_records(&value) else {
        return;
    };

    let encoded = encode_records(&records).expect("decoded records encode");
    let again = decode_records(&encoded).expect("encoded records decode");
    assert_eq!(again.len(), records.len());
    for (a, b) in again.iter().zip(&records) {
        assert_eq!(a.key(), b.key());
        assert_eq!(a.frequency(), b.frequency());
    }
});
