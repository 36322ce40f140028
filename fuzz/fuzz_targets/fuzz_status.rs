//! Fuzz target for status translation.
//!
//! Every native status must map to exactly one outcome: success, or an error
//! that carries the original code and formats without panicking.

#![no_main]

use clbind_core::{status, ErrorKind};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|codes: Vec<i32>| {
    for code in codes.into_iter().take(256) {
        match status::translate(code) {
            Ok(()) => assert_eq!(code, status::SUCCESS),
            Err(err) => {
                assert_ne!(code, status::SUCCESS);
                assert_eq!(err.code(), Some(code));
                assert!(!err.to_string().is_empty());

                // Unnamed codes are exactly the ones that end up as Unknown.
                let named = status::status_name(code).is_some();
                assert_eq!(named, err.kind() != ErrorKind::Unknown);
            }
        }
    }
});
