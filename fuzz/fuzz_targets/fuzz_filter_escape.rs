//! Fuzz target for search filter escaping.
//!
//! Run with:
//! cargo +nightly fuzz run fuzz_filter_escape -- -max_total_time=600

#![no_main]

use dirsync_connector::dn::{escape_dn_value, escape_filter_value};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    let escaped = escape_filter_value(s);
    assert!(!escaped.contains(&['(', ')', '*', '\0'][..]));

    // Every backslash starts a two-digit hex escape.
    let bytes = escaped.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            assert!(i + 2 < bytes.len());
            assert!(bytes[i + 1].is_ascii_hexdigit());
            assert!(bytes[i + 2].is_ascii_hexdigit());
            i += 3;
        } else {
            i += 1;
        }
    }

    let _ = escape_dn_value(s);
});
