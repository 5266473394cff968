//! External command execution used by the mount executor.

use std::ffi::OsString;
use std::process::Command;

use thiserror::Error;

/// Errors raised while running external programs.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    /// Raised when the program could not be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program name.
        program: String,
        /// Operating system error text.
        message: String,
    },
}

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Trimmed stderr, falling back to stdout when stderr is empty.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_owned()
        } else {
            stderr.to_owned()
        }
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        tracing::debug!(program, ?args, "running command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| CommandError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_prefers_stderr() {
        let output = CommandOutput {
            code: Some(1),
            stdout: String::from("out"),
            stderr: String::from(" err \n"),
        };
        assert_eq!(output.diagnostic(), "err");
    }

    #[test]
    fn diagnostic_falls_back_to_stdout() {
        let output = CommandOutput {
            code: Some(32),
            stdout: String::from("busy\n"),
            stderr: String::new(),
        };
        assert_eq!(output.diagnostic(), "busy");
        assert!(!output.is_success());
    }

    #[test]
    fn missing_program_reports_spawn_error() {
        let err = ProcessCommandRunner
            .run("scaleway-csi-definitely-missing", &[])
            .expect_err("spawn should fail");
        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}
