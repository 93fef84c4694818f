//! External Processes - linter, archiver and signer invocations
//!
//! Every external tool goes through `ProcessRunner` so tests and in-process
//! replacements can stand in for the real binaries.

use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// A fully specified external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            current_dir: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Name of the program without its directory, for matching and messages
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Captured result of a process that ran to completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Diagnostic text: stderr, or stdout when stderr is empty
    pub fn diagnostics(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {} seconds", .timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },

    #[error("I/O error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Synchronous process execution
pub trait ProcessRunner: Send + Sync {
    fn run(&self, command: &CommandSpec) -> Result<ProcessOutput, ProcessError>;
}

/// Runs commands as real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, command: &CommandSpec) -> Result<ProcessOutput, ProcessError> {
        let program = command.program_name();
        debug!(command = %command, "running external command");

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }

        let deadline = Instant::now() + command.timeout;
        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

        // Drain both pipes while waiting; a chatty child would otherwise block on a full pipe.
        let (tx, rx) = mpsc::channel();
        let mut pending = 0;
        if let Some(pipe) = child.stdout.take() {
            drain(pipe, Stream::Stdout, tx.clone());
            pending += 1;
        }
        if let Some(pipe) = child.stderr.take() {
            drain(pipe, Stream::Stderr, tx.clone());
            pending += 1;
        }
        drop(tx);

        let status = match child.wait_timeout(command.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProcessError::TimedOut {
                    program,
                    timeout: command.timeout,
                });
            }
            Err(source) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProcessError::Io { program, source });
            }
        };

        // Pipes close only when every holder exits, which includes any
        // background process the child left behind. The deadline covers both.
        let mut output = ProcessOutput {
            exit_code: status.code(),
            stdout: String::new(),
            stderr: String::new(),
        };
        for _ in 0..pending {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((stream, Ok(bytes))) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    match stream {
                        Stream::Stdout => output.stdout = text,
                        Stream::Stderr => output.stderr = text,
                    }
                }
                Ok((_, Err(source))) => return Err(ProcessError::Io { program, source }),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(%program, "output pipes still open after exit, abandoning readers");
                    return Err(ProcessError::TimedOut {
                        program,
                        timeout: command.timeout,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ProcessError::Io {
                        program,
                        source: std::io::Error::other("output reader exited early"),
                    })
                }
            }
        }
        Ok(output)
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

type Drained = (Stream, std::io::Result<Vec<u8>>);

fn drain<R: Read + Send + 'static>(mut pipe: R, stream: Stream, tx: Sender<Drained>) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let result = pipe.read_to_end(&mut buf).map(|_| buf);
        let _ = tx.send((stream, result));
    });
}
