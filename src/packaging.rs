//! Release Packaging - archive and detached signature
//!
//! Both files are produced under dot-prefixed `.partial` names and moved into
//! place only once signing succeeded. The signature is moved last: a bundle is
//! complete only when its `.asc` exists.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ArchiverConfig, SignerConfig};
use crate::process::{CommandSpec, ProcessRunner};

pub const ARCHIVE_SUFFIX: &str = "tar.bz2";
pub const SIGNATURE_SUFFIX: &str = "asc";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackagingStep {
    Archive,
    Sign,
    Finalize,
}

impl fmt::Display for PackagingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackagingStep::Archive => write!(f, "archive"),
            PackagingStep::Sign => write!(f, "sign"),
            PackagingStep::Finalize => write!(f, "finalize"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PackagingError {
    #[error(
        "Packaging failed at {step} step (exit code {}): {stderr}",
        .exit_code.map_or_else(|| "none".to_string(), |c| c.to_string())
    )]
    PackagingFailed {
        step: PackagingStep,
        exit_code: Option<i32>,
        stderr: String,
    },
}

/// Final locations of a completed bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlePaths {
    pub artifact: PathBuf,
    pub archive: PathBuf,
    pub signature: PathBuf,
}

impl BundlePaths {
    /// Paths for an artifact, named after the artifact's stem
    pub fn for_artifact(artifact: &Path, output_dir: &Path) -> Self {
        let stem = artifact_stem(artifact);
        let archive = output_dir.join(format!("{}.{}", stem, ARCHIVE_SUFFIX));
        let signature = output_dir.join(format!("{}.{}.{}", stem, ARCHIVE_SUFFIX, SIGNATURE_SUFFIX));
        Self {
            artifact: artifact.to_path_buf(),
            archive,
            signature,
        }
    }
}

struct Staging {
    archive: PathBuf,
    signature: PathBuf,
}

impl Staging {
    fn for_artifact(artifact: &Path, output_dir: &Path) -> Self {
        let stem = artifact_stem(artifact);
        Self {
            archive: output_dir.join(format!(".{}.{}.partial", stem, ARCHIVE_SUFFIX)),
            signature: output_dir.join(format!(
                ".{}.{}.{}.partial",
                stem, ARCHIVE_SUFFIX, SIGNATURE_SUFFIX
            )),
        }
    }

    fn clear(&self) {
        for path in [&self.archive, &self.signature] {
            if let Err(e) = remove_if_exists(path) {
                warn!(path = %path.display(), error = %e, "could not remove staging file");
            }
        }
    }
}

/// Archives a validated artifact and signs the archive
pub struct ReleasePackager {
    runner: Arc<dyn ProcessRunner>,
    archiver: ArchiverConfig,
    signer: SignerConfig,
}

impl ReleasePackager {
    pub fn new(runner: Arc<dyn ProcessRunner>, archiver: ArchiverConfig, signer: SignerConfig) -> Self {
        Self {
            runner,
            archiver,
            signer,
        }
    }

    /// The archive and sign commands `package` would run, in order
    pub fn commands(&self, artifact: &Path, output_dir: &Path, signing_key: &str) -> [CommandSpec; 2] {
        let staging = Staging::for_artifact(artifact, output_dir);
        [
            self.archive_command(artifact, &staging.archive),
            self.sign_command(&staging.archive, &staging.signature, signing_key),
        ]
    }

    fn archive_command(&self, artifact: &Path, archive: &Path) -> CommandSpec {
        let dir = match artifact.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = artifact.file_name().unwrap_or_default().to_string_lossy().into_owned();
        CommandSpec::new(self.archiver.bin.clone(), self.archiver.timeout()).args([
            "-cjf".to_string(),
            archive.display().to_string(),
            "-C".to_string(),
            dir.display().to_string(),
            file_name,
        ])
    }

    fn sign_command(&self, archive: &Path, signature: &Path, signing_key: &str) -> CommandSpec {
        CommandSpec::new(self.signer.bin.clone(), self.signer.timeout()).args([
            "--batch".to_string(),
            "--yes".to_string(),
            "--armor".to_string(),
            "--detach-sign".to_string(),
            "--default-key".to_string(),
            signing_key.to_string(),
            "--output".to_string(),
            signature.display().to_string(),
            archive.display().to_string(),
        ])
    }

    pub fn package(
        &self,
        artifact: &Path,
        output_dir: &Path,
        signing_key: &str,
    ) -> Result<BundlePaths, PackagingError> {
        let staging = Staging::for_artifact(artifact, output_dir);
        let bundle = BundlePaths::for_artifact(artifact, output_dir);
        staging.clear();

        let result = self
            .run_step(PackagingStep::Archive, &self.archive_command(artifact, &staging.archive))
            .and_then(|_| {
                self.run_step(
                    PackagingStep::Sign,
                    &self.sign_command(&staging.archive, &staging.signature, signing_key),
                )
            })
            .and_then(|_| finalize(&staging, &bundle));

        if let Err(e) = result {
            staging.clear();
            return Err(e);
        }

        info!(
            archive = %bundle.archive.display(),
            signature = %bundle.signature.display(),
            "archive + signature written"
        );
        Ok(bundle)
    }

    fn run_step(&self, step: PackagingStep, command: &CommandSpec) -> Result<(), PackagingError> {
        let output = self
            .runner
            .run(command)
            .map_err(|e| PackagingError::PackagingFailed {
                step,
                exit_code: None,
                stderr: e.to_string(),
            })?;

        if !output.success() {
            return Err(PackagingError::PackagingFailed {
                step,
                exit_code: output.exit_code,
                stderr: output.diagnostics().trim_end().to_string(),
            });
        }
        Ok(())
    }
}

fn finalize(staging: &Staging, bundle: &BundlePaths) -> Result<(), PackagingError> {
    let io_failure = |e: io::Error| PackagingError::PackagingFailed {
        step: PackagingStep::Finalize,
        exit_code: None,
        stderr: e.to_string(),
    };

    for produced in [&staging.archive, &staging.signature] {
        if !produced.is_file() {
            return Err(io_failure(io::Error::new(
                io::ErrorKind::NotFound,
                format!("expected output {} was not produced", produced.display()),
            )));
        }
    }

    remove_if_exists(&bundle.signature).map_err(io_failure)?;
    fs::rename(&staging.archive, &bundle.archive).map_err(io_failure)?;
    fs::rename(&staging.signature, &bundle.signature).map_err(io_failure)?;
    Ok(())
}

fn artifact_stem(artifact: &Path) -> String {
    artifact
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned()
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
