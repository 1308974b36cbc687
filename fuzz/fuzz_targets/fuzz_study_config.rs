//! Fuzz target for study.json parsing and validation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use msu_config::{validate_config, StudyConfig};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = StudyConfig::parse_json(text) {
        let _ = validate_config(&config);
    }
});
