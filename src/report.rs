//! Run Report - one outcome per channel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::hashing::FingerprintMismatch;
use crate::packaging::BundlePaths;
use crate::store::{Channel, ChannelSelector};

/// Last stage a channel reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStage {
    Loaded,
    RuleSetResolved,
    Rendered,
    Validated,
    Packaged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidChannelName,
    RuleSetQuery,
    FingerprintMismatch,
    Template,
    ArtifactWrite,
    ValidatorUnavailable,
    Packaging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    WriteArtifact,
    Lint,
    Archive,
    Sign,
}

/// Something a dry run would have done
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub action: ActionKind,
    pub target: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChannelOutcome {
    Packaged {
        bundle: BundlePaths,
        artifact_sha256: String,
    },
    DryRun {
        planned: Vec<PlannedAction>,
    },
    SkippedEmpty,
    SkippedLintFailed {
        exit_code: Option<i32>,
        diagnostics: String,
        /// Where the rejected text was kept; the previous artifact is untouched
        rejected_artifact: PathBuf,
    },
    Failed {
        stage: ChannelStage,
        kind: FailureKind,
        reason: String,
    },
}

impl ChannelOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ChannelOutcome::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            ChannelOutcome::SkippedEmpty | ChannelOutcome::SkippedLintFailed { .. }
        )
    }
}

/// Why a channel stopped before packaging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl ChannelFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelReport {
    pub channel_id: i64,
    pub channel_name: String,
    pub stage: ChannelStage,
    pub rule_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fingerprint_mismatches: Vec<FingerprintMismatch>,
    pub outcome: ChannelOutcome,
}

impl ChannelReport {
    pub fn new(channel: &Channel) -> Self {
        Self {
            channel_id: channel.id,
            channel_name: channel.name.clone(),
            stage: ChannelStage::Loaded,
            rule_count: 0,
            fingerprint_mismatches: vec![],
            outcome: ChannelOutcome::SkippedEmpty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub dry_run: bool,
    pub selector: ChannelSelector,
    pub channels: Vec<ChannelReport>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.channels.iter().any(|c| c.outcome.is_failed())
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelReport> {
        self.channels.iter().find(|c| c.channel_name == name)
    }

    pub fn packaged(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| matches!(c.outcome, ChannelOutcome::Packaged { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.channels.iter().filter(|c| c.outcome.is_skipped()).count()
    }

    pub fn failed(&self) -> usize {
        self.channels.iter().filter(|c| c.outcome.is_failed()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let outcome = ChannelOutcome::SkippedLintFailed {
            exit_code: Some(1),
            diagnostics: "syntax error line 4".to_string(),
            rejected_artifact: PathBuf::from("/out/spam-core.cf.rejected"),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "skipped_lint_failed");
        assert_eq!(json["diagnostics"], "syntax error line 4");

        let failed = ChannelOutcome::Failed {
            stage: ChannelStage::Rendered,
            kind: FailureKind::ValidatorUnavailable,
            reason: "missing".to_string(),
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["stage"], "rendered");
        assert_eq!(json["kind"], "validator_unavailable");
    }

    #[test]
    fn test_stage_order() {
        assert!(ChannelStage::Loaded < ChannelStage::RuleSetResolved);
        assert!(ChannelStage::Validated < ChannelStage::Packaged);
    }
}
