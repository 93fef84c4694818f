//! Configuration - defaults merged with a YAML file, built once at startup

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::store::ChannelSelector;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Whether a fingerprint mismatch stops a channel
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintPolicy {
    /// Log each mismatch and keep rendering
    #[default]
    Warn,
    /// Fail the channel on any mismatch
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub output_dir: PathBuf,
    pub template_dir: PathBuf,
    pub template_name: String,
    pub artifact_extension: String,
    /// Fail rendering on undefined template variables
    pub strict_templates: bool,
    pub fingerprint_policy: FingerprintPolicy,
    pub linter: LinterConfig,
    pub archiver: ArchiverConfig,
    pub signer: SignerConfig,
    pub channel_id: Option<i64>,
    pub channel_name: Option<String>,
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            output_dir: PathBuf::from("/var/lib/sa-channel/build"),
            template_dir: PathBuf::from("templates"),
            template_name: crate::DEFAULT_TEMPLATE_NAME.to_string(),
            artifact_extension: "cf".to_string(),
            strict_templates: true,
            fingerprint_policy: FingerprintPolicy::Warn,
            linter: LinterConfig::default(),
            archiver: ArchiverConfig::default(),
            signer: SignerConfig::default(),
            channel_id: None,
            channel_name: None,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/sa-channel/rules.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinterConfig {
    pub bin: PathBuf,
    /// `{artifact}` is replaced by the artifact path
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for LinterConfig {
    fn default() -> Self {
        Self {
            bin: PathBuf::from("/usr/bin/spamassassin"),
            args: vec!["--lint".to_string(), "--cf=include {artifact}".to_string()],
            timeout_secs: 30,
        }
    }
}

impl LinterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiverConfig {
    pub bin: PathBuf,
    pub timeout_secs: u64,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            bin: PathBuf::from("tar"),
            timeout_secs: 120,
        }
    }
}

impl ArchiverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    pub bin: PathBuf,
    /// Key identity handed to the signer (`--default-key`)
    pub key: String,
    pub timeout_secs: u64,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            bin: PathBuf::from("gpg"),
            key: "channel@example.org".to_string(),
            timeout_secs: 120,
        }
    }
}

impl SignerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub channel_id: Option<i64>,
    pub channel_name: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub dry_run: bool,
    pub strict_templates: Option<bool>,
}

impl Config {
    /// Load configuration from a YAML file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "loading configuration");

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// A selector given on the command line replaces the file's selector entirely.
    pub fn apply_overrides(&mut self, overrides: Overrides) -> Result<(), ConfigError> {
        if overrides.channel_id.is_some() || overrides.channel_name.is_some() {
            self.channel_id = overrides.channel_id;
            self.channel_name = overrides.channel_name;
        }
        if let Some(dir) = overrides.output_dir {
            self.output_dir = dir;
        }
        if overrides.dry_run {
            self.dry_run = true;
        }
        if let Some(strict) = overrides.strict_templates {
            self.strict_templates = strict;
        }
        self.validate()
    }

    pub fn selector(&self) -> ChannelSelector {
        match (self.channel_id, &self.channel_name) {
            (Some(id), _) => ChannelSelector::ById(id),
            (None, Some(name)) => ChannelSelector::ByName(name.clone()),
            (None, None) => ChannelSelector::All,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_id.is_some() && self.channel_name.is_some() {
            return Err(ConfigError::Invalid(
                "channel_id and channel_name are mutually exclusive".into(),
            ));
        }
        if self.template_name.trim().is_empty() {
            return Err(ConfigError::Invalid("template_name must not be empty".into()));
        }
        let ext = &self.artifact_extension;
        if ext.is_empty() || ext.contains(['/', '\\', '.']) {
            return Err(ConfigError::Invalid(format!(
                "artifact_extension '{}' must be a bare extension",
                ext
            )));
        }
        if self.signer.key.trim().is_empty() {
            return Err(ConfigError::Invalid("signer.key must not be empty".into()));
        }
        for (name, secs) in [
            ("linter", self.linter.timeout_secs),
            ("archiver", self.archiver.timeout_secs),
            ("signer", self.signer.timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!("{}.timeout_secs must be > 0", name)));
            }
        }
        if !self.linter.args.iter().any(|a| a.contains("{artifact}")) {
            return Err(ConfigError::Invalid(
                "linter.args must reference {artifact}".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.linter.timeout(), Duration::from_secs(30));
        assert_eq!(config.selector(), ChannelSelector::All);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::from_yaml(
            r#"
database:
  path: /srv/rules.db
signer:
  key: releases@example.net
fingerprint_policy: block
"#,
        )
        .unwrap();

        assert_eq!(config.database.path, PathBuf::from("/srv/rules.db"));
        assert_eq!(config.signer.key, "releases@example.net");
        assert_eq!(config.signer.bin, PathBuf::from("gpg"));
        assert_eq!(config.signer.timeout_secs, 120);
        assert_eq!(config.fingerprint_policy, FingerprintPolicy::Block);
        assert_eq!(config.template_name, "channel.cf.j2");
        assert!(config.strict_templates);
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let err = Config::from_yaml("fingerprint_policy: maybe\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_conflicting_selector_rejected() {
        let err = Config::from_yaml("channel_id: 1\nchannel_name: spam-core\n").unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = Config::from_yaml("linter:\n  timeout_secs: 0\n").unwrap_err();
        assert!(err.to_string().contains("linter.timeout_secs"));
    }

    #[test]
    fn test_overrides_replace_selector() {
        let mut config = Config::from_yaml("channel_name: phishing\n").unwrap();
        config
            .apply_overrides(Overrides {
                channel_id: Some(7),
                output_dir: Some(PathBuf::from("out")),
                dry_run: true,
                strict_templates: Some(false),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(config.selector(), ChannelSelector::ById(7));
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert!(config.dry_run);
        assert!(!config.strict_templates);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
