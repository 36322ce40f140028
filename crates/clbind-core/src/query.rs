//! Growing-buffer queries for native "get info" calls.
//!
//! Native info calls take a value buffer and report the size the full result
//! needs through `size_ret`. When the buffer is too small they answer
//! `INVALID_VALUE`, with or without the required size. [`query_bytes`] retries
//! with a larger buffer in that specific case only, bounded by
//! [`QueryConfig::max_size`] and [`QueryConfig::max_attempts`]. Running out of
//! attempts or room is an error; a truncated result is never returned.

use std::mem;

use bytemuck::Pod;
use tracing::trace;

use crate::config::QueryConfig;
use crate::error::{ClError, Result};
use crate::status::{self, Status};

/// Run a variable-length query, growing the buffer until the result fits.
///
/// `call` receives the value buffer and a slot for the native required size,
/// and returns the native status.
pub fn query_bytes<F>(config: &QueryConfig, mut call: F) -> Result<Vec<u8>>
where
    F: FnMut(&mut [u8], &mut usize) -> Status,
{
    let max_size = config.max_size.max(1);
    let mut size = config.initial_size.clamp(1, max_size);
    let mut last = ClError::invalid_value();

    for attempt in 1..=config.max_attempts.max(1) {
        let mut buffer = vec![0u8; size];
        let mut required = 0usize;
        let code = call(&mut buffer, &mut required);

        let too_small = match code {
            status::SUCCESS if required <= size => {
                buffer.truncate(required);
                return Ok(buffer);
            }
            status::SUCCESS => true,
            status::INVALID_VALUE => required == 0 || required > size,
            other => return Err(status::to_error(other).unwrap_or_else(ClError::invalid_value)),
        };

        if !too_small {
            // The buffer was big enough, so the value itself was rejected.
            return Err(ClError::InvalidValue { code });
        }

        last = status::to_error(code).unwrap_or_else(ClError::invalid_value);
        let next = if required > size {
            required
        } else {
            size.saturating_mul(2)
        };
        if next > max_size {
            trace!(attempt, required = next, max_size, "Query result exceeds cap");
            return Err(last);
        }

        trace!(attempt, from = size, to = next, "Growing query buffer");
        size = next;
    }

    Err(last)
}

/// String query: [`query_bytes`] with exactly one trailing terminator stripped.
pub fn query_string<F>(config: &QueryConfig, call: F) -> Result<String>
where
    F: FnMut(&mut [u8], &mut usize) -> Status,
{
    let mut bytes = query_bytes(config, call)?;
    if bytes.last() == Some(&0) {
        bytes.pop();
    }
    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    })
}

/// Fixed-size query: one native call into a buffer of exactly `size_of::<T>()`.
pub fn query_scalar<T, F>(mut call: F) -> Result<T>
where
    T: Pod,
    F: FnMut(&mut [u8], &mut usize) -> Status,
{
    let mut buffer = vec![0u8; mem::size_of::<T>()];
    let mut required = 0usize;
    status::translate(call(&mut buffer, &mut required))?;

    if required != buffer.len() {
        return Err(ClError::InternalConsistency(format!(
            "scalar query returned {} bytes, expected {}",
            required,
            buffer.len()
        )));
    }
    Ok(bytemuck::pod_read_unaligned(&buffer))
}

/// List query: [`query_bytes`] reinterpreted as an array of `T`.
pub fn query_list<T, F>(config: &QueryConfig, call: F) -> Result<Vec<T>>
where
    T: Pod,
    F: FnMut(&mut [u8], &mut usize) -> Status,
{
    let bytes = query_bytes(config, call)?;
    let width = mem::size_of::<T>();
    if width == 0 || bytes.len() % width != 0 {
        return Err(ClError::InternalConsistency(format!(
            "list query returned {} bytes, not a multiple of {}",
            bytes.len(),
            width
        )));
    }
    Ok(bytes
        .chunks_exact(width)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

/// Native-side helper: answer an info query from a complete value.
///
/// Follows the native convention: `size_ret` always receives the full size;
/// an empty buffer only probes; a non-empty buffer smaller than the value is
/// `INVALID_VALUE`.
pub fn answer_query(value: &[u8], out: &mut [u8], size_ret: &mut usize) -> Status {
    *size_ret = value.len();
    if out.is_empty() {
        return status::SUCCESS;
    }
    if out.len() < value.len() {
        return status::INVALID_VALUE;
    }
    out[..value.len()].copy_from_slice(value);
    status::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn config(initial: usize, max_attempts: u32) -> QueryConfig {
        QueryConfig {
            initial_size: initial,
            max_size: 1024 * 1024,
            max_attempts,
        }
    }

    /// Responder that reports "too small" without a size until `n` bytes fit.
    fn silent_responder(n: usize, calls: &mut u32) -> impl FnMut(&mut [u8], &mut usize) -> Status + '_ {
        move |buf, size_ret| {
            *calls += 1;
            if buf.len() < n {
                *size_ret = 0;
                return status::INVALID_VALUE;
            }
            buf[..n].fill(b'x');
            *size_ret = n;
            status::SUCCESS
        }
    }

    #[test]
    fn test_fits_first_time() {
        let value = b"hello\0";
        let result = query_bytes(&config(64, 3), |buf, size| answer_query(value, buf, size)).unwrap();
        assert_eq!(result, value);
    }

    #[test]
    fn test_grows_to_reported_size() {
        let value = vec![7u8; 200];
        let mut calls = 0;
        let result = query_bytes(&config(16, 3), |buf, size| {
            calls += 1;
            answer_query(&value, buf, size)
        })
        .unwrap();
        assert_eq!(result, value);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_attempt_bound_when_doubling() {
        let (initial, n) = (16usize, 200usize);
        let bound = ((n as f64 / initial as f64).log2().ceil() as u32) + 1;

        let mut calls = 0;
        let result = query_bytes(&config(initial, 8), silent_responder(n, &mut calls)).unwrap();
        assert_eq!(result.len(), n);
        assert!(calls <= bound, "{} calls, bound {}", calls, bound);
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        let mut calls = 0;
        let err = query_bytes(&config(16, 3), silent_responder(4096, &mut calls)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_cap_overflow_is_an_error() {
        let value = vec![0u8; 4096];
        let cfg = QueryConfig {
            initial_size: 16,
            max_size: 1024,
            max_attempts: 10,
        };
        let err = query_bytes(&cfg, |buf, size| answer_query(&value, buf, size)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let mut calls = 0;
        let err = query_bytes(&config(16, 3), |_, _| {
            calls += 1;
            status::INVALID_PROGRAM
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidResource);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_genuine_invalid_value_is_not_retried() {
        let mut calls = 0;
        let err = query_bytes(&config(16, 3), |_, size| {
            calls += 1;
            *size = 4;
            status::INVALID_VALUE
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_string_strips_exactly_one_terminator() {
        let value = b"log text\0";
        let text = query_string(&config(4, 3), |buf, size| answer_query(value, buf, size)).unwrap();
        assert_eq!(text, "log text");
        assert_eq!(text.len(), value.len() - 1);

        let doubled = b"ab\0\0";
        let text = query_string(&config(4, 3), |buf, size| answer_query(doubled, buf, size)).unwrap();
        assert_eq!(text.as_bytes(), b"ab\0");
    }

    #[test]
    fn test_empty_string() {
        let text = query_string(&config(4, 3), |buf, size| answer_query(b"\0", buf, size)).unwrap();
        assert!(text.is_empty());
    }

    #[test]
    fn test_scalar_and_list() {
        let count: u32 = 3;
        let value = query_scalar::<u32, _>(|buf, size| answer_query(bytemuck::bytes_of(&count), buf, size)).unwrap();
        assert_eq!(value, 3);

        let sizes: [usize; 3] = [10, 20, 30];
        let list = query_list::<usize, _>(&config(4, 4), |buf, size| {
            answer_query(bytemuck::cast_slice(&sizes), buf, size)
        })
        .unwrap();
        assert_eq!(list, sizes);
    }

    #[test]
    fn test_scalar_size_mismatch() {
        let err = query_scalar::<u64, _>(|buf, size| answer_query(&[1, 2, 3, 4], buf, size)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalConsistency);
    }
}
