//! Fuzz target for the growing-buffer query protocol.
//!
//! Drives `query_bytes` against native responders that report sizes
//! honestly, not at all, or wrongly, and checks that a successful query
//! always returns the complete value.

#![no_main]

use arbitrary::Arbitrary;
use clbind_core::config::QueryConfig;
use clbind_core::query::{answer_query, query_bytes};
use clbind_core::status;
use libfuzzer_sys::fuzz_target;

/// How the simulated native call reports the required size.
#[derive(Debug, Arbitrary)]
enum Reporting {
    /// Standard behavior: the full size is always reported.
    Honest,
    /// "Too small" without a size.
    Silent,
    /// A required size off by `delta` from the truth.
    Wrong { delta: i16 },
}

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    value: Vec<u8>,
    initial_size: u16,
    max_size: u16,
    max_attempts: u8,
    reporting: Reporting,
}

fuzz_target!(|input: FuzzInput| {
    let config = QueryConfig {
        initial_size: input.initial_size as usize,
        max_size: input.max_size as usize,
        max_attempts: u32::from(input.max_attempts % 16),
    };
    let value = &input.value;

    let result = query_bytes(&config, |out, size_ret| match input.reporting {
        Reporting::Honest => answer_query(value, out, size_ret),
        Reporting::Silent => {
            if out.len() < value.len() {
                *size_ret = 0;
                return status::INVALID_VALUE;
            }
            answer_query(value, out, size_ret)
        }
        Reporting::Wrong { delta } => {
            let code = answer_query(value, out, size_ret);
            *size_ret = (*size_ret as i64 + i64::from(delta)).max(0) as usize;
            code
        }
    });

    if let (Ok(bytes), Reporting::Honest | Reporting::Silent) = (&result, &input.reporting) {
        assert_eq!(bytes, value);
    }
    if let Ok(bytes) = result {
        assert!(bytes.len() <= config.max_size.max(1));
    }
});
