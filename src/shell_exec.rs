//! External command execution.
//!
//! All `git` and `gh` invocations go through [`Cmd`] to ensure consistent
//! debug logging, captured output, typed failures, and cancellation. Nothing
//! else in the crate spawns processes.
//!
//! ```text
//! $ git status --porcelain [legacy]      # logged with context
//! [gf-trace] cmd="git status --porcelain" dur=12.3ms ok=true
//! ```

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;

/// Poll interval while waiting on a child with a cancel token attached.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Captured result of a finished child process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A command that exited non-zero, with the invocation and captured result.
#[derive(Debug)]
pub struct CommandFailed {
    /// Full command line, e.g. `git push origin master`
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandFailed {
    /// One-line summary: trimmed stderr when present, otherwise exit info.
    pub fn summary(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.to_string()
        } else {
            stderr.to_string()
        }
    }
}

impl fmt::Display for CommandFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let exit = match self.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "killed by signal".to_string(),
        };
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            write!(f, "`{}` failed ({exit})", self.command)
        } else {
            write!(f, "`{}` failed ({exit}): {stderr}", self.command)
        }
    }
}

impl Error for CommandFailed {}

/// Failure modes of [`Cmd::run`].
#[derive(Debug)]
pub enum CommandError {
    /// The process could not be spawned or waited on.
    Spawn { command: String, source: std::io::Error },
    /// The cancel token tripped; the child (if started) was killed.
    Cancelled { command: String },
    /// The process exited non-zero.
    Failed(CommandFailed),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Spawn { command, source } => {
                write!(f, "failed to execute `{command}`: {source}")
            }
            CommandError::Cancelled { command } => write!(f, "`{command}` cancelled"),
            CommandError::Failed(failed) => failed.fmt(f),
        }
    }
}

impl Error for CommandError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CommandError::Spawn { source, .. } => Some(source),
            CommandError::Cancelled { .. } => None,
            CommandError::Failed(failed) => Some(failed),
        }
    }
}

/// Builder for a single external command invocation.
#[derive(Debug)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    envs: HashMap<String, String>,
    cancel: Option<CancelToken>,
    /// Short context shown in debug logs, typically the repository directory name.
    context: Option<String>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            envs: HashMap::new(),
            cancel: None,
            context: None,
        }
    }

    /// A `git` invocation. Terminal prompts are disabled unless the caller
    /// explicitly overrides `GIT_TERMINAL_PROMPT` via [`Cmd::env`].
    pub fn git<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new("git").args(args)
    }

    /// A GitHub CLI (`gh`) invocation.
    pub fn gh<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new("gh").args(args)
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    pub fn cancel_token(mut self, token: &CancelToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// The full command line, for logging and error messages.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    /// Run and capture output without checking the exit code.
    ///
    /// Fails only on spawn errors or cancellation. Use [`Cmd::run`] when a
    /// non-zero exit should be an error.
    pub fn output(self) -> Result<CommandOutput, CommandError> {
        let command_line = self.command_line();

        match &self.context {
            Some(ctx) => log::debug!("$ {command_line} [{ctx}]"),
            None => log::debug!("$ {command_line}"),
        }

        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        // Never let git block on credential prompts in batch operation
        if self.program == "git" && !self.envs.contains_key("GIT_TERMINAL_PROMPT") {
            command.env("GIT_TERMINAL_PROMPT", "0");
        }

        let t0 = Instant::now();
        let result = match self.cancel {
            Some(token) => run_cancellable(command, &command_line, &token),
            None => run_blocking(command, &command_line),
        };
        let duration_ms = t0.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(output) => log::debug!(
                "[gf-trace] cmd=\"{command_line}\" dur={duration_ms:.1}ms ok={}",
                output.success()
            ),
            Err(e) => {
                log::debug!("[gf-trace] cmd=\"{command_line}\" dur={duration_ms:.1}ms err=\"{e}\"")
            }
        }

        result
    }

    /// Run, capture output, and fail with [`CommandFailed`] on non-zero exit.
    pub fn run(self) -> Result<CommandOutput, CommandError> {
        let command_line = self.command_line();
        let output = self.output()?;
        if output.success() {
            Ok(output)
        } else {
            Err(CommandError::Failed(CommandFailed {
                command: command_line,
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            }))
        }
    }
}

fn run_blocking(mut command: Command, command_line: &str) -> Result<CommandOutput, CommandError> {
    let output = command
        .stdin(Stdio::null())
        .output()
        .map_err(|source| CommandError::Spawn {
            command: command_line.to_string(),
            source,
        })?;
    Ok(CommandOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Spawn with piped output and poll, killing the child when the token trips.
///
/// Output pipes are drained on reader threads so a chatty child cannot
/// deadlock against a full pipe buffer while we poll.
fn run_cancellable(
    mut command: Command,
    command_line: &str,
    token: &CancelToken,
) -> Result<CommandOutput, CommandError> {
    if token.is_cancelled() {
        return Err(CommandError::Cancelled {
            command: command_line.to_string(),
        });
    }

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| CommandError::Spawn {
            command: command_line.to_string(),
            source,
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_handle = thread::spawn(move || stdout.map(drain).unwrap_or_default());
    let stderr_handle = thread::spawn(move || stderr.map(drain).unwrap_or_default());

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if token.is_cancelled() {
                    // Best effort: the child may have exited in between
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_handle.join();
                    let _ = stderr_handle.join();
                    return Err(CommandError::Cancelled {
                        command: command_line.to_string(),
                    });
                }
                thread::sleep(CANCEL_POLL_INTERVAL);
            }
            Err(source) => {
                return Err(CommandError::Spawn {
                    command: command_line.to_string(),
                    source,
                });
            }
        }
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();
    Ok(CommandOutput {
        exit_code: status.code(),
        stdout,
        stderr,
    })
}

fn drain(mut reader: impl Read) -> String {
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_exit_code() {
        let output = Cmd::new("sh").args(["-c", "echo hello"]).run().unwrap();
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn non_zero_exit_becomes_command_failed() {
        let err = Cmd::new("sh")
            .args(["-c", "echo oops 1>&2; exit 3"])
            .run()
            .unwrap_err();
        match err {
            CommandError::Failed(failed) => {
                assert_eq!(failed.exit_code, Some(3));
                assert_eq!(failed.stderr.trim(), "oops");
                assert_eq!(failed.summary(), "oops");
                assert!(failed.to_string().contains("exit code 3"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn summary_falls_back_to_exit_info_without_stderr() {
        let err = Cmd::new("sh").args(["-c", "exit 7"]).run().unwrap_err();
        match err {
            CommandError::Failed(failed) => {
                assert!(failed.summary().contains("exit code 7"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn spawn_failure_is_typed() {
        let err = Cmd::new("gitfleet-no-such-binary").run().unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[test]
    fn pre_cancelled_token_aborts_before_spawn() {
        let token = CancelToken::new();
        token.cancel();
        let err = Cmd::new("sh")
            .args(["-c", "sleep 10"])
            .cancel_token(&token)
            .run()
            .unwrap_err();
        assert!(matches!(err, CommandError::Cancelled { .. }));
    }

    #[test]
    fn cancellation_kills_a_running_child() {
        let token = CancelToken::new();
        let canceller = {
            let token = token.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                token.cancel();
            })
        };
        let t0 = Instant::now();
        let err = Cmd::new("sh")
            .args(["-c", "sleep 30"])
            .cancel_token(&token)
            .run()
            .unwrap_err();
        canceller.join().unwrap();
        assert!(matches!(err, CommandError::Cancelled { .. }));
        assert!(t0.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn command_line_joins_program_and_args() {
        assert_eq!(Cmd::git(["status", "--porcelain"]).command_line(), "git status --porcelain");
        assert_eq!(Cmd::new("gh").command_line(), "gh");
    }
}
