//! A toy compiler: enough of a kernel language front end to produce build
//! logs, binaries and kernel signatures.
//!
//! Sources compile unless they contain an `#error` directive or the device
//! has a scripted failure. Kernels are found by scanning for
//! `kernel void name(...)` declarations.

use clbind_core::status;

use crate::state::{KernelSig, SimResult};

/// Prefix of every binary this compiler emits.
pub const BINARY_MAGIC: &[u8] = b"SIMBIN\n";

/// Language versions accepted by `-cl-std=`.
const LANGUAGE_VERSIONS: &[&str] = &["CL1.0", "CL1.1", "CL1.2", "CL2.0", "CL3.0"];

/// Per-device compile result: `Ok(log)` or `Err(log)`.
pub(crate) type CompileOutcome = Result<String, String>;

/// Validate the option string of a build.
pub(crate) fn check_options(options: &str) -> SimResult<()> {
    for token in options.split_whitespace() {
        if let Some(version) = token.strip_prefix("-cl-std=") {
            if !LANGUAGE_VERSIONS.contains(&version) {
                return Err(status::INVALID_BUILD_OPTIONS);
            }
        }
    }
    Ok(())
}

/// Compile `code` for one device.
pub(crate) fn compile(code: &str, device_name: &str, scripted_failure: Option<&str>) -> CompileOutcome {
    if let Some(log) = scripted_failure {
        return Err(log.to_string());
    }

    let errors: Vec<String> = code
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            line.trim_start()
                .strip_prefix("#error")
                .map(|message| format!("{}:{}: error: {}", device_name, index + 1, message.trim()))
        })
        .collect();

    if errors.is_empty() {
        Ok(String::new())
    } else {
        Err(errors.join("\n"))
    }
}

/// Binary image of a successfully compiled program.
pub(crate) fn encode_binary(code: &str) -> Vec<u8> {
    let mut binary = Vec::with_capacity(BINARY_MAGIC.len() + code.len());
    binary.extend_from_slice(BINARY_MAGIC);
    binary.extend_from_slice(code.as_bytes());
    binary
}

/// Recover the program text from a binary.
pub(crate) fn decode_binary(binary: &[u8]) -> SimResult<String> {
    if binary.is_empty() {
        return Err(status::INVALID_VALUE);
    }
    let body = binary.strip_prefix(BINARY_MAGIC).ok_or(status::INVALID_BINARY)?;
    String::from_utf8(body.to_vec()).map_err(|_| status::INVALID_BINARY)
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Scan `code` for kernel declarations.
pub(crate) fn parse_kernels(code: &str) -> Vec<KernelSig> {
    let mut kernels = Vec::new();
    let mut rest = code;

    while let Some(pos) = rest.find("kernel") {
        let before = rest[..pos].trim_end_matches("__");
        let after = &rest[pos + "kernel".len()..];
        rest = after;

        if before.chars().next_back().is_some_and(is_ident) {
            continue;
        }
        let Some(after) = after.trim_start().strip_prefix("void") else {
            continue;
        };
        if !after.starts_with(char::is_whitespace) {
            continue;
        }
        let after = after.trim_start();
        let name_len = after.find(|c: char| !is_ident(c)).unwrap_or(after.len());
        if name_len == 0 {
            continue;
        }
        let Some(params) = after[name_len..].trim_start().strip_prefix('(') else {
            continue;
        };
        let Some(close) = params.find(')') else {
            continue;
        };

        let params = params[..close].trim();
        let num_args = if params.is_empty() || params == "void" {
            0
        } else {
            params.split(',').count() as u32
        };
        kernels.push(KernelSig {
            name: after[..name_len].to_string(),
            num_args,
        });
    }
    kernels
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
__kernel void scale(__global float* data, float factor) {
    data[get_global_id(0)] *= factor;
}

kernel void fill(global int* out, int value, uint n) {}
__kernel void noop(void) {}
void helper(int kernel_count) {}
"#;

    #[test]
    fn test_parse_kernels() {
        let kernels = parse_kernels(SOURCE);
        let names: Vec<_> = kernels.iter().map(|k| (k.name.as_str(), k.num_args)).collect();
        assert_eq!(names, vec![("scale", 2), ("fill", 3), ("noop", 0)]);
    }

    #[test]
    fn test_error_directive_fails_compile() {
        let code = "kernel void k() {}\n\n  #error unsupported type\n";
        let log = compile(code, "gpu0", None).unwrap_err();
        assert_eq!(log, "gpu0:3: error: unsupported type");
        assert_eq!(compile("kernel void k() {}", "gpu0", None), Ok(String::new()));
    }

    #[test]
    fn test_scripted_failure_log_is_verbatim() {
        let log = compile("kernel void k() {}", "gpu0", Some("syntax error at line 4")).unwrap_err();
        assert_eq!(log, "syntax error at line 4");
    }

    #[test]
    fn test_binary_codec() {
        let binary = encode_binary("kernel void k() {}");
        assert!(binary.starts_with(BINARY_MAGIC));
        assert_eq!(decode_binary(&binary).unwrap(), "kernel void k() {}");
        assert_eq!(decode_binary(&[]), Err(status::INVALID_VALUE));
        assert_eq!(decode_binary(b"ELF"), Err(status::INVALID_BINARY));
    }

    #[test]
    fn test_language_version_option() {
        assert!(check_options("-cl-std=CL1.1 -Werror -D N=4").is_ok());
        assert_eq!(check_options("-cl-std=CL9.9"), Err(status::INVALID_BUILD_OPTIONS));
    }
}
