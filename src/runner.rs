use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::ExitStatus;

use serde::Serialize;
use tracing::debug;

use crate::console;

/// A single external command: program, arguments, working directory and
/// how its result should be handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Non-zero exit becomes an error instead of a warning.
    pub check: bool,
    /// Capture and return stdout instead of streaming it.
    pub capture: bool,
    /// Keep stderr and tolerated failures off the console.
    pub quiet: bool,
}

impl Invocation {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: PathBuf::from("."),
            check: true,
            capture: false,
            quiet: false,
        }
    }

    #[must_use]
    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    #[must_use]
    pub fn tolerant(mut self) -> Self {
        self.check = false;
        self
    }

    #[must_use]
    pub fn captured(mut self) -> Self {
        self.capture = true;
        self
    }

    #[must_use]
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Exit code; `-1` when the child was killed by a signal.
    pub code: i32,
    /// Trimmed stdout, present only for captured invocations.
    pub stdout: Option<String>,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("command '{program}' not found. Is it installed and in your PATH?")]
    NotInstalled { program: String },
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("`{command}` failed with exit code {code}")]
    Failed { command: String, code: i32 },
    #[error("writing command output: {0}")]
    Console(#[from] std::io::Error),
}

/// Executes invocations. Orchestrators only talk to this trait so they can
/// be driven without spawning real processes.
pub trait CommandRunner {
    fn run(&mut self, invocation: &Invocation) -> Result<RunOutcome, RunError>;
}

/// Runs invocations as child processes, echoing to `out`.
pub struct SystemRunner<W: Write> {
    out: W,
}

impl<W: Write> SystemRunner<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn stream(&mut self, invocation: &Invocation) -> Result<i32, RunError> {
        let reader = expression(invocation)?
            .stderr_to_stdout()
            .unchecked()
            .reader()
            .map_err(|err| spawn_error(invocation, err))?;

        let mut lines = BufReader::new(&reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            let read = lines
                .read_until(b'\n', &mut line)
                .map_err(|err| spawn_error(invocation, err))?;
            if read == 0 {
                break;
            }
            self.out.write_all(&line)?;
            self.out.flush()?;
        }

        match reader.try_wait() {
            Ok(Some(output)) => Ok(exit_code(output.status)),
            Ok(None) => Ok(-1),
            Err(err) => Err(spawn_error(invocation, err)),
        }
    }

    fn capture(&mut self, invocation: &Invocation) -> Result<(i32, String), RunError> {
        let output = expression(invocation)?
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run()
            .map_err(|err| spawn_error(invocation, err))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        writeln!(self.out, "{stdout}")?;
        if invocation.quiet {
            debug!(command = %invocation.display(), stderr = %stderr.trim(), "suppressed stderr");
        } else if !stderr.trim().is_empty() {
            writeln!(self.out, "{}", console::warning(&format!("STDERR:\n{stderr}")))?;
        }

        Ok((exit_code(output.status), stdout.trim().to_string()))
    }
}

impl<W: Write> CommandRunner for SystemRunner<W> {
    fn run(&mut self, invocation: &Invocation) -> Result<RunOutcome, RunError> {
        writeln!(
            self.out,
            "\n{}",
            console::command_banner(&invocation.display(), &invocation.cwd)
        )?;
        debug!(
            command = %invocation.display(),
            cwd = %invocation.cwd.display(),
            capture = invocation.capture,
            "spawning"
        );

        let (code, stdout) = if invocation.capture {
            let (code, stdout) = self.capture(invocation)?;
            (code, Some(stdout))
        } else {
            (self.stream(invocation)?, None)
        };

        let outcome = RunOutcome { code, stdout };
        if !outcome.success() {
            if invocation.check {
                return Err(RunError::Failed {
                    command: invocation.display(),
                    code,
                });
            }
            if !invocation.quiet {
                writeln!(
                    self.out,
                    "{}",
                    console::failure(&format!("Command failed with exit code {code}"))
                )?;
            }
            debug!(command = %invocation.display(), code, "continuing after command failure");
        }

        Ok(outcome)
    }
}

fn expression(invocation: &Invocation) -> Result<duct::Expression, RunError> {
    let program = which::which(&invocation.program).map_err(|_| RunError::NotInstalled {
        program: invocation.program.clone(),
    })?;
    Ok(duct::cmd(program, invocation.args.iter()).dir(&invocation.cwd))
}

fn spawn_error(invocation: &Invocation, source: std::io::Error) -> RunError {
    if source.kind() == std::io::ErrorKind::NotFound {
        return RunError::NotInstalled {
            program: invocation.program.clone(),
        };
    }
    RunError::Spawn {
        command: invocation.display(),
        source,
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
