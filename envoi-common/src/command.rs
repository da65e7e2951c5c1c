//! Running external commands: DKIM key retrieval and delegated delivery.
//!
//! Callers depend on [`CommandRunner`] so tests can substitute a fake.

use std::{io, process::Stdio};

use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, process::Command};

use crate::{error::CommandError, internal};

/// What a finished command produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code, or `None` if the process was killed by a signal.
    pub code: Option<i32>,
}

impl CommandOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Standard output followed by standard error, as text.
    #[must_use]
    pub fn combined(&self) -> String {
        let mut out = String::from_utf8_lossy(&self.stdout).into_owned();
        out.push_str(&String::from_utf8_lossy(&self.stderr));
        out
    }

    /// A printable description of how the process exited.
    #[must_use]
    pub fn status(&self) -> String {
        self.code.map_or_else(
            || "signal".to_string(),
            |code| format!("exit status: {code}"),
        )
    }
}

/// Capability to run a process with the given stdin and extra environment.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `argv`, wait for it to finish and collect its output. A non-zero
    /// exit is not an error at this level.
    async fn run(
        &self,
        argv: &[String],
        stdin: &[u8],
        env: &[(String, String)],
    ) -> Result<CommandOutput, CommandError>;
}

/// Split a configured command line on whitespace. Quoting is not supported.
///
/// # Errors
///
/// Returns [`CommandError::Empty`] for a blank command line.
pub fn split_command(command: &str) -> Result<Vec<String>, CommandError> {
    let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
    if argv.is_empty() {
        return Err(CommandError::Empty);
    }
    Ok(argv)
}

/// Run a command line and return its standard output, failing on a
/// non-zero exit.
///
/// # Errors
///
/// Returns an error if the command cannot be run or exits unsuccessfully.
pub async fn capture(runner: &dyn CommandRunner, command: &str) -> Result<Vec<u8>, CommandError> {
    let argv = split_command(command)?;
    let output = runner.run(&argv, &[], &[]).await?;

    if !output.success() {
        return Err(CommandError::Failed {
            command: command.to_string(),
            status: output.status(),
            output: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

/// Runs commands as child processes of this one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommand;

#[async_trait]
impl CommandRunner for SystemCommand {
    async fn run(
        &self,
        argv: &[String],
        stdin: &[u8],
        env: &[(String, String)],
    ) -> Result<CommandOutput, CommandError> {
        let (program, args) = argv.split_first().ok_or(CommandError::Empty)?;
        let spawn_err = |source| CommandError::Spawn {
            command: argv.join(" "),
            source,
        };

        internal!(level = DEBUG, "Running {}", argv.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .envs(env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;

        let mut pipe = child.stdin.take();
        let writer = async move {
            if let Some(pipe) = pipe.as_mut() {
                pipe.write_all(stdin).await?;
                pipe.shutdown().await?;
            }
            drop(pipe);
            Ok::<_, io::Error>(())
        };

        let (written, output) = tokio::join!(writer, child.wait_with_output());
        let output = output.map_err(spawn_err)?;

        // The child may exit without reading all of its input.
        if let Err(err) = written
            && err.kind() != io::ErrorKind::BrokenPipe
        {
            return Err(spawn_err(err));
        }

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            code: output.status.code(),
        })
    }
}
