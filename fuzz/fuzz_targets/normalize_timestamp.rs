#![no_main]

use libfuzzer_sys::fuzz_target;
use tunelog::normalize::{normalize_timestamp, normalize_to_iso};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    if let Some(timestamp) = normalize_timestamp(&raw) {
        let canonical = timestamp.to_string();
        assert_eq!(normalize_to_iso(&canonical).as_deref(), Some(canonical.as_str()));
    }
});
