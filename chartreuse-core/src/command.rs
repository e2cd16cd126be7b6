//! External command execution.
//!
//! The migration tools are driven as subprocesses. Both output streams are always captured
//! in full and the real exit code is reported; [`CommandRunner::run_or_fail`] turns a
//! nonzero exit into a [`ToolFailure`] carrying the command line, both streams and the code.

use crate::error::{ChartreuseError, Result, ToolFailure};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Split a user-supplied parameter string the way a POSIX shell would
pub fn split_parameters(parameters: &str) -> Result<Vec<String>> {
    shlex::split(parameters).ok_or_else(|| {
        ChartreuseError::config(format!(
            "Could not parse additional parameters (unbalanced quotes?): {}",
            parameters
        ))
    })
}

/// Runs external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` in `working_directory`, reporting its exit code without judging it
    async fn run(&self, command: &CommandLine, working_directory: &Path) -> Result<CommandOutput>;

    /// Run `command`, treating a nonzero exit code as fatal
    async fn run_or_fail(
        &self,
        command: &CommandLine,
        working_directory: &Path,
    ) -> Result<CommandOutput> {
        let output = self.run(command, working_directory).await?;
        if !output.success() {
            return Err(ToolFailure {
                command: command.to_string(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            }
            .into());
        }
        Ok(output)
    }
}

/// Runs commands as child processes of this one
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &CommandLine, working_directory: &Path) -> Result<CommandOutput> {
        info!(command = %command, directory = %working_directory.display(), "Running command");

        let output = Command::new(&command.program)
            .args(&command.args)
            .current_dir(working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                ChartreuseError::internal(format!("Failed to spawn `{}`: {}", command, e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        // Killed by a signal: no code, report it as a failure.
        let exit_code = output.status.code().unwrap_or(-1);

        if !stdout.is_empty() {
            debug!(command = %command, "stdout:\n{}", stdout);
        }
        if !stderr.is_empty() {
            debug!(command = %command, "stderr:\n{}", stderr);
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}
