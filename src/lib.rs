//! sa-channel Core - Rule Channel Compiler
//!
//! # Guarantees
//! 1. Only active production rules ship, ordered by rule name
//! 2. Fingerprint mismatches are always reported
//! 3. Nothing is packaged without a passing lint
//! 4. A bundle is complete only once its signature exists
//! 5. One channel's failure never stops another

pub mod config;
pub mod hashing;
pub mod store;
pub mod templates;
pub mod process;
pub mod validation;
pub mod packaging;
pub mod report;
pub mod pipeline;

pub use config::{Config, ConfigError, FingerprintPolicy, Overrides};
pub use hashing::{compute_fingerprint, verify, verify_rule_set, FingerprintMismatch};
pub use store::{Channel, ChannelRuleSet, ChannelSelector, MemoryRuleStore, Rule, RuleSetLoader, RuleStore, SqliteRuleStore};
pub use templates::{ArtifactRenderer, TemplateError, UndefinedMode};
pub use process::{CommandSpec, ProcessError, ProcessOutput, ProcessRunner, SystemRunner};
pub use validation::{SyntaxValidator, ValidationError, ValidationResult};
pub use packaging::{BundlePaths, PackagingError, ReleasePackager};
pub use report::{ChannelOutcome, ChannelReport, ChannelStage, FailureKind, RunReport};
pub use pipeline::{PipelineError, PipelineSettings, ReleasePipeline};

pub const GENERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DEFAULT_TEMPLATE_NAME: &str = "channel.cf.j2";
