//! External process invocation.
//!
//! Every binary pgshift touches (pg_ctl, psql, pg_upgrade, vacuumdb) is
//! described as a [`PgCommand`] and executed through a [`CommandRunner`].
//! Each call blocks the workflow until the child exits; nothing runs
//! concurrently.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::output::Output;

/// How a child's stdio is wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdioMode {
    /// Capture stdout/stderr for parsing (probes, catalog queries)
    #[default]
    Capture,
    /// Hand the terminal to the child so the operator sees its progress
    Inherit,
}

/// A fully resolved external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub stdio: StdioMode,
}

impl PgCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            stdio: StdioMode::Capture,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, arg: &Path) -> Self {
        self.arg(arg.display().to_string())
    }

    pub fn inherit(mut self) -> Self {
        self.stdio = StdioMode::Inherit;
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Binary name without its directory (e.g. `pg_ctl`)
    pub fn program_name(&self) -> &str {
        self.program
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
    }

    /// True if any argument equals `value` exactly
    pub fn has_arg(&self, value: &str) -> bool {
        self.args.iter().any(|a| a == value)
    }

    /// Shell-like rendering for --verbose output and error messages
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) || arg.contains('"') {
                parts.push(format!("'{}'", arg.replace('\'', "'\\''")));
            } else {
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }
}

/// Result of a child process that was spawned successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the child was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit code for messages (-1 when killed by a signal)
    pub fn code_or_signal(&self) -> i32 {
        self.code.unwrap_or(-1)
    }

    /// Trimmed stderr, falling back to stdout when stderr is empty
    pub fn diagnostics(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs external commands to completion.
///
/// `Err` means the command could not be started at all (binary missing,
/// permission denied). A command that ran and failed is `Ok` with a
/// non-zero exit code.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    async fn run(&self, command: &PgCommand) -> Result<CommandOutput>;
}

/// Production runner backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, command: &PgCommand) -> Result<CommandOutput> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }

        match command.stdio {
            StdioMode::Capture => {
                let output = cmd
                    .stdin(Stdio::null())
                    .output()
                    .await
                    .with_context(|| format!("Failed to execute {}", command.display()))?;
                Ok(CommandOutput {
                    code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            StdioMode::Inherit => {
                let status = cmd
                    .status()
                    .await
                    .with_context(|| format!("Failed to execute {}", command.display()))?;
                Ok(CommandOutput {
                    code: status.code(),
                    ..Default::default()
                })
            }
        }
    }
}

/// A runner paired with the output layer: echoes commands under --verbose.
pub struct Shell<'a, R> {
    runner: &'a R,
    pub output: &'a Output,
}

impl<'a, R: CommandRunner> Shell<'a, R> {
    pub fn new(runner: &'a R, output: &'a Output) -> Self {
        Self { runner, output }
    }

    pub async fn run(&self, command: &PgCommand) -> Result<CommandOutput> {
        self.output.command(&command.display());
        if command.stdio == StdioMode::Inherit {
            self.output.flush();
        }
        self.runner.run(command).await
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted runner for workflow tests: records every command and answers
    //! from a responder closure.

    use super::*;
    use std::sync::Mutex;

    type Responder = Box<dyn Fn(&PgCommand) -> Result<CommandOutput> + Send + Sync>;

    pub struct ScriptedRunner {
        calls: Mutex<Vec<PgCommand>>,
        responder: Responder,
    }

    impl ScriptedRunner {
        pub fn new(
            responder: impl Fn(&PgCommand) -> Result<CommandOutput> + Send + Sync + 'static,
        ) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                responder: Box::new(responder),
            }
        }

        /// Every command exits 0 with empty output
        pub fn succeeding() -> Self {
            Self::new(|_| Ok(ok("")))
        }

        pub fn calls(&self) -> Vec<PgCommand> {
            self.calls.lock().unwrap().clone()
        }

        /// Calls rendered as "program arg arg ..." without directories
        pub fn call_lines(&self) -> Vec<String> {
            self.calls()
                .iter()
                .map(|c| format!("{} {}", c.program_name(), c.args.join(" ")))
                .collect()
        }
    }

    impl CommandRunner for ScriptedRunner {
        async fn run(&self, command: &PgCommand) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(command.clone());
            (self.responder)(command)
        }
    }

    pub fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}
