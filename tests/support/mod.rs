//! Scripted stand-ins for the linter, archiver and signer.

#![allow(dead_code)]

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use sa_channel_core::{CommandSpec, ProcessError, ProcessOutput, ProcessRunner};

struct Scripted {
    program: String,
    /// Only applies when some argument contains this text
    when_arg_contains: Option<String>,
    reply: Reply,
}

#[derive(Clone)]
enum Reply {
    Exit { code: i32, stderr: String },
    Missing,
    TimedOut,
}

/// Records every command; tar and gpg write plausible outputs unless scripted otherwise
#[derive(Default)]
pub struct ScriptedRunner {
    scripts: Vec<Scripted>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn passing() -> Self {
        Self::default()
    }

    pub fn exit(mut self, program: &str, code: i32, stderr: &str) -> Self {
        self.scripts.push(Scripted {
            program: program.to_string(),
            when_arg_contains: None,
            reply: Reply::Exit {
                code,
                stderr: stderr.to_string(),
            },
        });
        self
    }

    pub fn exit_when(mut self, program: &str, arg_contains: &str, code: i32, stderr: &str) -> Self {
        self.scripts.push(Scripted {
            program: program.to_string(),
            when_arg_contains: Some(arg_contains.to_string()),
            reply: Reply::Exit {
                code,
                stderr: stderr.to_string(),
            },
        });
        self
    }

    pub fn missing(mut self, program: &str) -> Self {
        self.scripts.push(Scripted {
            program: program.to_string(),
            when_arg_contains: None,
            reply: Reply::Missing,
        });
        self
    }

    pub fn timing_out(mut self, program: &str) -> Self {
        self.scripts.push(Scripted {
            program: program.to_string(),
            when_arg_contains: None,
            reply: Reply::TimedOut,
        });
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.program_name()).collect()
    }

    fn scripted_reply(&self, command: &CommandSpec) -> Option<Reply> {
        let name = command.program_name();
        self.scripts
            .iter()
            .find(|s| {
                s.program == name
                    && s.when_arg_contains
                        .as_ref()
                        .map_or(true, |needle| command.args.iter().any(|a| a.contains(needle)))
            })
            .map(|s| s.reply.clone())
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(&self, command: &CommandSpec) -> Result<ProcessOutput, ProcessError> {
        self.calls.lock().unwrap().push(command.clone());
        let program = command.program_name();

        match self.scripted_reply(command) {
            Some(Reply::Exit { code, stderr }) => {
                return Ok(ProcessOutput {
                    exit_code: Some(code),
                    stdout: String::new(),
                    stderr,
                })
            }
            Some(Reply::Missing) => {
                return Err(ProcessError::Spawn {
                    program,
                    source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
                })
            }
            Some(Reply::TimedOut) => {
                return Err(ProcessError::TimedOut {
                    program,
                    timeout: command.timeout,
                })
            }
            None => {}
        }

        match program.as_str() {
            // tar -cjf <archive> -C <dir> <file>
            "tar" => {
                let archive = PathBuf::from(&command.args[1]);
                let member = PathBuf::from(&command.args[3]).join(&command.args[4]);
                let mut bytes = b"TAR:".to_vec();
                bytes.extend(fs::read(member).unwrap());
                fs::write(archive, bytes).unwrap();
            }
            // gpg ... --output <sig> <archive>
            "gpg" => {
                let pos = command.args.iter().position(|a| a == "--output").unwrap();
                let signature = PathBuf::from(&command.args[pos + 1]);
                fs::write(
                    signature,
                    "-----BEGIN PGP SIGNATURE-----\nscripted\n-----END PGP SIGNATURE-----\n",
                )
                .unwrap();
            }
            _ => {}
        }

        Ok(ProcessOutput {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

pub const TIMEOUT: Duration = Duration::from_secs(30);
