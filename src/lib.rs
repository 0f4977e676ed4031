//! `mcpl`: discover and call tools across configured MCP servers.
//!
//! The binary is a thin shell over [`launchpad_mcp`]; this crate owns config
//! discovery, argument parsing, rendering and exit codes.

pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;
pub mod output;
pub mod status;

use launchpad_mcp::GatewayError;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_USAGE: u8 = 2;
pub const EXIT_CONFIG: u8 = 3;

/// Process exit code for a failed command.
///
/// Input that could not be parsed at all (malformed JSON arguments, a bad
/// regex) is a usage error. Arguments that parse but violate a tool's schema
/// are a call failure.
pub fn exit_code(err: &GatewayError) -> u8 {
    match err {
        GatewayError::Config { .. } => EXIT_CONFIG,
        GatewayError::Validation { schema: None, .. } => EXIT_USAGE,
        _ => EXIT_FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&GatewayError::config("no config")), EXIT_CONFIG);
        assert_eq!(
            exit_code(&GatewayError::Validation {
                subject: "JSON arguments".into(),
                violations: vec!["arguments are not valid JSON".into()],
                schema: None,
            }),
            EXIT_USAGE
        );
        assert_eq!(
            exit_code(&GatewayError::Validation {
                subject: "arguments for 'github/create_issue'".into(),
                violations: vec!["missing required field 'title'".into()],
                schema: Some(json!({"required": ["title"]})),
            }),
            EXIT_FAILURE
        );
        assert_eq!(
            exit_code(&GatewayError::server_not_found("foo", &["github".to_string()])),
            EXIT_FAILURE
        );
    }
}
