//! Template System - Channel Artifact Rendering

use chrono::{DateTime, Utc};
use minijinja::{context, Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::store::ChannelRuleSet;
use crate::GENERATOR_VERSION;

pub const GENERATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%SZ";

/// How undefined template variables are treated
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UndefinedMode {
    /// Any undefined variable aborts rendering
    #[default]
    Strict,
    /// Undefined variables render as empty text
    Lenient,
}

impl UndefinedMode {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            Self::Strict
        } else {
            Self::Lenient
        }
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template {template} unavailable: {source}")]
    Load {
        template: String,
        #[source]
        source: minijinja::Error,
    },

    #[error("Rendering {template} for channel '{channel}' failed: {source}")]
    Render {
        template: String,
        channel: String,
        #[source]
        source: minijinja::Error,
    },
}

/// Binds a channel and its rule set into the named template
pub struct ArtifactRenderer {
    env: Environment<'static>,
    template_name: String,
}

impl ArtifactRenderer {
    /// Renderer resolving templates from a directory
    pub fn from_dir(dir: &Path, template_name: &str, mode: UndefinedMode) -> Self {
        let mut env = base_environment(mode);
        env.set_loader(minijinja::path_loader(dir));
        Self {
            env,
            template_name: template_name.to_string(),
        }
    }

    /// Renderer with a single in-memory template
    pub fn from_source(
        template_name: &str,
        source: &str,
        mode: UndefinedMode,
    ) -> Result<Self, TemplateError> {
        let mut env = base_environment(mode);
        env.add_template_owned(template_name.to_string(), source.to_string())
            .map_err(|source| TemplateError::Load {
                template: template_name.to_string(),
                source,
            })?;
        Ok(Self {
            env,
            template_name: template_name.to_string(),
        })
    }

    pub fn template_name(&self) -> &str {
        &self.template_name
    }

    /// Fails early when the template is missing or does not parse
    pub fn check(&self) -> Result<(), TemplateError> {
        self.env
            .get_template(&self.template_name)
            .map(|_| ())
            .map_err(|source| TemplateError::Load {
                template: self.template_name.clone(),
                source,
            })
    }

    /// Render the artifact text. Same inputs and timestamp give identical bytes.
    pub fn render(
        &self,
        rule_set: &ChannelRuleSet,
        generated_at: DateTime<Utc>,
    ) -> Result<String, TemplateError> {
        let template = self
            .env
            .get_template(&self.template_name)
            .map_err(|source| TemplateError::Load {
                template: self.template_name.clone(),
                source,
            })?;

        let rendered = template
            .render(context! {
                channel => &rule_set.channel,
                rules => &rule_set.rules,
                generated_at => generated_at.format(GENERATED_AT_FORMAT).to_string(),
                generator_version => GENERATOR_VERSION,
            })
            .map_err(|source| TemplateError::Render {
                template: self.template_name.clone(),
                channel: rule_set.channel.name.clone(),
                source,
            })?;

        debug!(
            channel = %rule_set.channel.name,
            rules = rule_set.len(),
            bytes = rendered.len(),
            "rendered artifact"
        );
        Ok(rendered)
    }
}

fn base_environment(mode: UndefinedMode) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_keep_trailing_newline(true);
    env.set_undefined_behavior(match mode {
        UndefinedMode::Strict => UndefinedBehavior::Strict,
        UndefinedMode::Lenient => UndefinedBehavior::Lenient,
    });
    env
}
