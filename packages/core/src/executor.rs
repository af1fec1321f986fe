//! Command execution helpers.
//!
//! The run is expected to hold root already, so commands are executed
//! directly without any privilege escalation wrapper.

use std::process::{Command, Output};

use tracing::debug;

use crate::error::{Error, IoResultExt, Result};

/// Runs a command and captures its output, whatever the exit status.
pub fn run(cmd: &str, args: &[&str]) -> Result<Output> {
    debug!("Running '{} {}'", cmd, args.join(" "));
    Command::new(cmd)
        .args(args)
        .output()
        .command_context(cmd)
}

/// Runs a command, failing with [`Error::CommandExit`] on a non-zero exit.
pub fn run_checked(cmd: &str, args: &[&str]) -> Result<Output> {
    let output = run(cmd, args)?;

    if !output.status.success() {
        return Err(Error::CommandExit {
            command: cmd.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}
