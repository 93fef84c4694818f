//! Release Pipeline - Single Entry Point
//!
//! Loader -> verifier -> renderer -> validator -> packager, one channel at a
//! time. A channel's failure is recorded in its report and never stops the
//! channels after it; only configuration, store and selection errors abort a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::config::{Config, ConfigError, FingerprintPolicy};
use crate::hashing::{sha256_hex, verify_rule_set, FingerprintMismatch};
use crate::packaging::{BundlePaths, ReleasePackager};
use crate::process::ProcessRunner;
use crate::report::{
    ActionKind, ChannelFailure, ChannelOutcome, ChannelReport, ChannelStage, FailureKind,
    PlannedAction, RunReport,
};
use crate::store::{Channel, ChannelSelector, LoadError, RuleSetLoader, RuleStore, StoreError};
use crate::templates::{ArtifactRenderer, TemplateError, UndefinedMode};
use crate::validation::{SyntaxValidator, ValidationError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Rule store error: {0}")]
    Store(#[from] StoreError),

    #[error("No channel matched {0}")]
    NotFound(ChannelSelector),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("Cannot prepare output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<LoadError> for PipelineError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::NotFound(selector) => PipelineError::NotFound(selector),
            LoadError::Store(e) => PipelineError::Store(e),
        }
    }
}

/// Run-wide settings the orchestrator needs beyond its components
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub output_dir: PathBuf,
    pub artifact_extension: String,
    pub signing_key: String,
    pub fingerprint_policy: FingerprintPolicy,
    pub dry_run: bool,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            artifact_extension: config.artifact_extension.clone(),
            signing_key: config.signer.key.clone(),
            fingerprint_policy: config.fingerprint_policy,
            dry_run: config.dry_run,
        }
    }
}

impl PipelineSettings {
    pub fn artifact_path(&self, channel_name: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", channel_name, self.artifact_extension))
    }
}

/// A channel with the number of rules it would ship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub channel: Channel,
    pub eligible_rules: usize,
}

/// Fingerprint audit of one channel's rule set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelAudit {
    pub channel_id: i64,
    pub channel_name: String,
    pub rules_checked: usize,
    pub mismatches: Vec<FingerprintMismatch>,
}

/// The release pipeline - single entry point for channel generation
pub struct ReleasePipeline<S> {
    loader: RuleSetLoader<S>,
    renderer: ArtifactRenderer,
    validator: SyntaxValidator,
    packager: ReleasePackager,
    settings: PipelineSettings,
}

impl<S: RuleStore> ReleasePipeline<S> {
    pub fn new(
        loader: RuleSetLoader<S>,
        renderer: ArtifactRenderer,
        validator: SyntaxValidator,
        packager: ReleasePackager,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            loader,
            renderer,
            validator,
            packager,
            settings,
        }
    }

    /// Wire every component from one configuration
    pub fn from_config(store: S, config: &Config, runner: Arc<dyn ProcessRunner>) -> Self {
        let renderer = ArtifactRenderer::from_dir(
            &config.template_dir,
            &config.template_name,
            UndefinedMode::from_strict(config.strict_templates),
        );
        Self::new(
            RuleSetLoader::new(store),
            renderer,
            SyntaxValidator::new(runner.clone(), config.linter.clone()),
            ReleasePackager::new(runner, config.archiver.clone(), config.signer.clone()),
            PipelineSettings::from(config),
        )
    }

    /// Selected channels with their eligible rule counts
    pub fn list_channels(&self, selector: &ChannelSelector) -> Result<Vec<ChannelSummary>, PipelineError> {
        self.loader
            .select_channels(selector)?
            .into_iter()
            .map(|channel| -> Result<ChannelSummary, PipelineError> {
                let set = self.loader.rule_set(&channel)?;
                Ok(ChannelSummary {
                    eligible_rules: set.len(),
                    channel,
                })
            })
            .collect()
    }

    /// Check stored fingerprints without rendering anything
    pub fn audit_fingerprints(&self, selector: &ChannelSelector) -> Result<Vec<ChannelAudit>, PipelineError> {
        let mut audits = vec![];
        for channel in self.loader.select_channels(selector)? {
            let set = self.loader.rule_set(&channel)?;
            let mismatches = verify_rule_set(&set.rules);
            for m in &mismatches {
                warn!(channel = %channel.name, rule = %m.rule_name, "fingerprint mismatch");
            }
            audits.push(ChannelAudit {
                channel_id: channel.id,
                channel_name: channel.name,
                rules_checked: set.rules.len(),
                mismatches,
            });
        }
        Ok(audits)
    }

    pub fn run(&self, selector: &ChannelSelector) -> Result<RunReport, PipelineError> {
        self.run_at(selector, Utc::now())
    }

    /// Run with a fixed generation timestamp
    pub fn run_at(
        &self,
        selector: &ChannelSelector,
        generated_at: DateTime<Utc>,
    ) -> Result<RunReport, PipelineError> {
        let channels = self.loader.select_channels(selector)?;
        // A missing or unparsable template is one run-level error, not one per channel.
        self.renderer.check()?;

        if self.settings.dry_run {
            info!("dry run: no files will be written and no external commands run");
        } else {
            fs::create_dir_all(&self.settings.output_dir).map_err(|source| {
                PipelineError::OutputDir {
                    path: self.settings.output_dir.clone(),
                    source,
                }
            })?;
        }

        let reports: Vec<ChannelReport> = channels
            .iter()
            .map(|channel| self.process_channel(channel, generated_at))
            .collect();

        let report = RunReport {
            run_id: Uuid::new_v4(),
            generated_at,
            dry_run: self.settings.dry_run,
            selector: selector.clone(),
            channels: reports,
        };

        info!(
            run_id = %report.run_id,
            packaged = report.packaged(),
            skipped = report.skipped(),
            failed = report.failed(),
            "generation finished"
        );
        Ok(report)
    }

    /// Run one channel to a terminal outcome
    pub fn process_channel(&self, channel: &Channel, generated_at: DateTime<Utc>) -> ChannelReport {
        let span = info_span!("channel", name = %channel.name, id = channel.id);
        let _guard = span.enter();
        info!("processing channel");

        let mut report = ChannelReport::new(channel);
        report.outcome = match self.advance(channel, generated_at, &mut report) {
            Ok(outcome) => outcome,
            Err(failure) => {
                error!(stage = ?report.stage, kind = ?failure.kind, "{}", failure.reason);
                ChannelOutcome::Failed {
                    stage: report.stage,
                    kind: failure.kind,
                    reason: failure.reason,
                }
            }
        };
        report
    }

    fn advance(
        &self,
        channel: &Channel,
        generated_at: DateTime<Utc>,
        report: &mut ChannelReport,
    ) -> Result<ChannelOutcome, ChannelFailure> {
        if !is_safe_file_name(&channel.name) {
            return Err(ChannelFailure::new(
                FailureKind::InvalidChannelName,
                format!("channel name '{}' cannot be used as a file name", channel.name.escape_debug()),
            ));
        }

        let rule_set = self
            .loader
            .rule_set(channel)
            .map_err(|e| ChannelFailure::new(FailureKind::RuleSetQuery, e.to_string()))?;
        report.stage = ChannelStage::RuleSetResolved;
        report.rule_count = rule_set.len();
        info!(rules = rule_set.len(), "active production rules");

        if rule_set.is_empty() {
            warn!("no active rules, skipping channel");
            return Ok(ChannelOutcome::SkippedEmpty);
        }

        let mismatches = verify_rule_set(&rule_set.rules);
        for m in &mismatches {
            warn!(rule = %m.rule_name, stored = %m.stored, computed = %m.computed, "fingerprint mismatch");
        }
        report.fingerprint_mismatches = mismatches;
        if !report.fingerprint_mismatches.is_empty()
            && self.settings.fingerprint_policy == FingerprintPolicy::Block
        {
            let names: Vec<&str> = report
                .fingerprint_mismatches
                .iter()
                .map(|m| m.rule_name.as_str())
                .collect();
            return Err(ChannelFailure::new(
                FailureKind::FingerprintMismatch,
                format!("fingerprint mismatch for rule(s): {}", names.join(", ")),
            ));
        }

        let text = self
            .renderer
            .render(&rule_set, generated_at)
            .map_err(|e| ChannelFailure::new(FailureKind::Template, e.to_string()))?;
        report.stage = ChannelStage::Rendered;

        let artifact = self.settings.artifact_path(&channel.name);
        if self.settings.dry_run {
            let planned = self.plan(&artifact);
            for action in &planned {
                info!(
                    action = ?action.action,
                    target = %action.target.display(),
                    command = action.command.as_deref().unwrap_or(""),
                    "[dry-run] would run"
                );
            }
            return Ok(ChannelOutcome::DryRun { planned });
        }

        // Lint a staged copy; the artifact is replaced only once lint passes.
        let staged = staged_artifact_path(&artifact);
        fs::write(&staged, &text).map_err(|e| {
            ChannelFailure::new(
                FailureKind::ArtifactWrite,
                format!("cannot write {}: {}", staged.display(), e),
            )
        })?;
        info!(path = %staged.display(), bytes = text.len(), "artifact staged");

        match self.validator.validate(&staged) {
            Ok(_) => {}
            Err(ValidationError::ValidationFailed {
                exit_code,
                diagnostics,
                ..
            }) => {
                error!("lint errors, not packaging channel");
                let rejected = rejected_artifact_path(&artifact);
                let rejected_artifact = match fs::rename(&staged, &rejected) {
                    Ok(()) => rejected,
                    Err(e) => {
                        warn!(path = %staged.display(), error = %e, "cannot keep rejected artifact");
                        staged
                    }
                };
                return Ok(ChannelOutcome::SkippedLintFailed {
                    exit_code,
                    diagnostics,
                    rejected_artifact,
                });
            }
            Err(e @ ValidationError::ValidatorUnavailable { .. }) => {
                discard(&staged);
                return Err(ChannelFailure::new(FailureKind::ValidatorUnavailable, e.to_string()));
            }
        }

        fs::rename(&staged, &artifact).map_err(|e| {
            discard(&staged);
            ChannelFailure::new(
                FailureKind::ArtifactWrite,
                format!("cannot move {} into place: {}", artifact.display(), e),
            )
        })?;
        discard(&rejected_artifact_path(&artifact));
        info!(path = %artifact.display(), "artifact written");
        report.stage = ChannelStage::Validated;

        let bundle = self
            .packager
            .package(&artifact, &self.settings.output_dir, &self.settings.signing_key)
            .map_err(|e| ChannelFailure::new(FailureKind::Packaging, e.to_string()))?;
        report.stage = ChannelStage::Packaged;

        Ok(ChannelOutcome::Packaged {
            bundle,
            artifact_sha256: sha256_hex(text.as_bytes()),
        })
    }

    fn plan(&self, artifact: &Path) -> Vec<PlannedAction> {
        let [archive, sign] = self.packager.commands(
            artifact,
            &self.settings.output_dir,
            &self.settings.signing_key,
        );
        let bundle = BundlePaths::for_artifact(artifact, &self.settings.output_dir);
        vec![
            PlannedAction {
                action: ActionKind::WriteArtifact,
                target: artifact.to_path_buf(),
                command: None,
            },
            PlannedAction {
                action: ActionKind::Lint,
                target: artifact.to_path_buf(),
                command: Some(
                    self.validator
                        .lint_command(&staged_artifact_path(artifact))
                        .to_string(),
                ),
            },
            PlannedAction {
                action: ActionKind::Archive,
                target: bundle.archive,
                command: Some(archive.to_string()),
            },
            PlannedAction {
                action: ActionKind::Sign,
                target: bundle.signature,
                command: Some(sign.to_string()),
            },
        ]
    }
}

fn staged_artifact_path(artifact: &Path) -> PathBuf {
    let name = artifact.file_name().unwrap_or_default().to_string_lossy();
    artifact.with_file_name(format!(".{}.partial", name))
}

fn rejected_artifact_path(artifact: &Path) -> PathBuf {
    let name = artifact.file_name().unwrap_or_default().to_string_lossy();
    artifact.with_file_name(format!("{}.rejected", name))
}

fn discard(path: &Path) {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), error = %e, "cannot remove file");
        }
        _ => {}
    }
}

/// A channel name usable as a plain file name in the output directory
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && !name.chars().any(|c| c == '/' || c == '\\' || c.is_control())
}
