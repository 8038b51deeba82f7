//! Thin helpers around external tool invocation.

use std::process::{Command, Output};

use tracing::debug;

use super::traits::SystemError;

/// Runs a command and returns its output regardless of exit status.
pub(crate) fn run(program: &str, args: &[&str]) -> Result<Output, SystemError> {
    debug!("exec: {} {}", program, args.join(" "));
    Command::new(program)
        .args(args)
        .output()
        .map_err(SystemError::Io)
}

/// Runs a command and fails with captured stderr on non-zero exit.
pub(crate) fn run_checked(program: &str, args: &[&str]) -> Result<Output, SystemError> {
    let output = run(program, args)?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(tool_error(program, args, &output))
    }
}

/// Builds a `SystemError::Tool` from a failed invocation.
pub(crate) fn tool_error(program: &str, args: &[&str], output: &Output) -> SystemError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = stderr.trim();
    SystemError::Tool {
        command: format!("{} {}", program, args.join(" ")),
        detail: if detail.is_empty() {
            format!("exit status {}", output.status)
        } else {
            detail.to_string()
        },
    }
}
