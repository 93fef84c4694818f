//! Validation System - External Lint of Rendered Artifacts
//!
//! "Could not check" and "checked and rejected" are separate error kinds.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::config::LinterConfig;
use crate::process::{CommandSpec, ProcessError, ProcessRunner};

const ARTIFACT_PLACEHOLDER: &str = "{artifact}";

/// A passed lint run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub artifact: PathBuf,
    pub command: String,
    /// Linter output, kept verbatim even on success
    pub diagnostics: String,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Linter {linter} unavailable: {reason}")]
    ValidatorUnavailable { linter: String, reason: String },

    #[error("Lint rejected {}: {diagnostics}", .artifact.display())]
    ValidationFailed {
        artifact: PathBuf,
        exit_code: Option<i32>,
        diagnostics: String,
    },
}

/// Runs the target engine's linter against an artifact file
pub struct SyntaxValidator {
    runner: Arc<dyn ProcessRunner>,
    linter: LinterConfig,
}

impl SyntaxValidator {
    pub fn new(runner: Arc<dyn ProcessRunner>, linter: LinterConfig) -> Self {
        Self { runner, linter }
    }

    /// The exact command `validate` would run
    pub fn lint_command(&self, artifact: &Path) -> CommandSpec {
        let path = artifact.display().to_string();
        CommandSpec::new(self.linter.bin.clone(), self.linter.timeout()).args(
            self.linter
                .args
                .iter()
                .map(|arg| arg.replace(ARTIFACT_PLACEHOLDER, &path)),
        )
    }

    pub fn validate(&self, artifact: &Path) -> Result<ValidationResult, ValidationError> {
        let command = self.lint_command(artifact);
        let output = self.runner.run(&command).map_err(|e| {
            let linter = command.program.display().to_string();
            error!(%linter, error = %e, "linter could not be run");
            ValidationError::ValidatorUnavailable {
                linter,
                reason: unavailable_reason(&e),
            }
        })?;

        let name = artifact.file_name().unwrap_or_default().to_string_lossy();
        // No exit status: the linter was killed before it could judge anything.
        if output.exit_code.is_none() {
            let linter = command.program.display().to_string();
            error!(%linter, artifact = %name, "linter terminated by signal");
            return Err(ValidationError::ValidatorUnavailable {
                linter,
                reason: "terminated by signal".to_string(),
            });
        }
        if !output.success() {
            let diagnostics = output.diagnostics().trim_end().to_string();
            error!(artifact = %name, exit_code = ?output.exit_code, "lint failed:\n{}", diagnostics);
            return Err(ValidationError::ValidationFailed {
                artifact: artifact.to_path_buf(),
                exit_code: output.exit_code,
                diagnostics,
            });
        }

        info!(artifact = %name, "lint ok");
        Ok(ValidationResult {
            artifact: artifact.to_path_buf(),
            command: command.to_string(),
            diagnostics: output.diagnostics().trim_end().to_string(),
        })
    }
}

fn unavailable_reason(err: &ProcessError) -> String {
    match err {
        ProcessError::Spawn { source, .. } => format!("cannot start: {}", source),
        other => other.to_string(),
    }
}
