//! Command Execution Boundary
//!
//! The only place the engine spawns processes. Every install, extraction,
//! firmware and probe command is described by an [`Invocation`] and run
//! through a [`CommandRunner`], so the orchestrator and the evaluator can be
//! driven by deterministic fakes in tests.
//!
//! # Contract
//!
//! - Shell invocations go through the platform interpreter
//!   (`cmd.exe /D /C` on Windows, `sh -c` elsewhere).
//! - The working directory, when set, is also exported as `PACKAGEPATH`.
//! - stdout and stderr are captured; the call blocks until the process exits.
//! - A process that cannot be started is an error; a non-zero exit is not.

use crate::error::{DeployError, Result};
use crate::logic::dependency::Probe;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Environment variable carrying the package directory
pub const PACKAGE_PATH_ENV: &str = "PACKAGEPATH";

/// What to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Program {
    /// A command line for the platform interpreter
    Shell(String),
    /// An executable with discrete arguments
    Executable { path: PathBuf, args: Vec<String> },
}

/// A fully described process launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: Program,
    pub working_dir: Option<PathBuf>,
    pub elevated: bool,
}

impl Invocation {
    pub fn shell(command_line: impl Into<String>) -> Self {
        Self {
            program: Program::Shell(command_line.into()),
            working_dir: None,
            elevated: false,
        }
    }

    pub fn executable<I, S>(path: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: Program::Executable {
                path: path.into(),
                args: args.into_iter().map(Into::into).collect(),
            },
            working_dir: None,
            elevated: false,
        }
    }

    /// Run inside `dir` (also exported as `PACKAGEPATH`)
    pub fn in_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Require administrative privileges
    pub fn elevated(mut self) -> Self {
        self.elevated = true;
        self
    }

    /// Human-readable command text for logs and error messages
    pub fn command_text(&self) -> String {
        match &self.program {
            Program::Shell(line) => line.clone(),
            Program::Executable { path, args } => {
                let mut text = path.display().to_string();
                for arg in args {
                    text.push(' ');
                    text.push_str(arg);
                }
                text
            }
        }
    }
}

/// Output from a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, -1 when terminated by a signal
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn with_exit_code(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Default::default()
        }
    }

    /// Diagnostic text for failure messages: captured output when there is
    /// any, else the bare exit code
    pub fn diagnostics(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => format!("exit code {}", self.exit_code),
            (false, true) => format!("exit code {}, stdout: {}", self.exit_code, stdout),
            (true, false) => format!("exit code {}, stderr: {}", self.exit_code, stderr),
            (false, false) => format!(
                "exit code {}, stdout: {}, stderr: {}",
                self.exit_code, stdout, stderr
            ),
        }
    }
}

/// Capability to run an [`Invocation`] to completion
pub trait CommandRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        (**self).run(invocation)
    }
}

/// Runs invocations as real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let command_text = invocation.command_text();
        info!(command = %command_text, dir = ?invocation.working_dir, "Running command");

        let mut cmd = build_command(invocation);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &invocation.working_dir {
            cmd.current_dir(dir).env(PACKAGE_PATH_ENV, dir);
        }

        let output = cmd.output().map_err(|source| DeployError::Spawn {
            command: command_text.clone(),
            source,
        })?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        };
        debug!(command = %command_text, exit_code = result.exit_code, "Command finished");
        Ok(result)
    }
}

#[cfg(windows)]
fn build_command(invocation: &Invocation) -> Command {
    use std::os::windows::process::CommandExt;

    // Elevation is a host precondition on Windows, checked by `sanity`
    match &invocation.program {
        Program::Shell(line) => {
            let mut cmd = Command::new("cmd.exe");
            cmd.args(["/D", "/C"]).raw_arg(line);
            cmd
        }
        Program::Executable { path, args } => {
            let mut cmd = Command::new(path);
            cmd.args(args);
            cmd
        }
    }
}

#[cfg(not(windows))]
fn build_command(invocation: &Invocation) -> Command {
    let (program, args): (PathBuf, Vec<String>) = match &invocation.program {
        Program::Shell(line) => (PathBuf::from("sh"), vec!["-c".to_string(), line.clone()]),
        Program::Executable { path, args } => (path.clone(), args.clone()),
    };

    if invocation.elevated && !crate::sanity::is_elevated() {
        let mut cmd = Command::new("sudo");
        cmd.arg("-n").arg(program).args(args);
        cmd
    } else {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd
    }
}

/// [`Probe`] backed by a [`CommandRunner`]
pub struct CommandProbe<R> {
    runner: R,
    working_dir: Option<PathBuf>,
}

impl<R: CommandRunner> CommandProbe<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            working_dir: None,
        }
    }

    pub fn in_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }
}

impl<R: CommandRunner> Probe for CommandProbe<R> {
    fn probe(&self, command: &str) -> Result<i32> {
        let mut invocation = Invocation::shell(command);
        invocation.working_dir = self.working_dir.clone();
        match self.runner.run(&invocation) {
            Ok(output) => Ok(output.exit_code),
            Err(DeployError::Spawn { command, source }) => {
                Err(DeployError::ProbeExecution { command, source })
            }
            Err(e) => Err(e),
        }
    }
}
