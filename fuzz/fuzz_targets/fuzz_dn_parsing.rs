//! Fuzz target for distinguished name parsing.
//!
//! Member values come straight from the enterprise directory, so the
//! parser must reject malformed input without panicking.
//!
//! Run with:
//! cargo +nightly fuzz run fuzz_dn_parsing -- -max_total_time=600

#![no_main]

use dirsync_connector::dn::{leaf_common_name, DistinguishedName};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(dn) = DistinguishedName::parse(s) {
        let _ = dn.common_name();
        let _ = dn.to_string();
    }

    let _ = leaf_common_name(s);
});
