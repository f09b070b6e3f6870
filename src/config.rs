//! Evaluation panel configuration: which models play which role.
//!
//! Resolution order, later wins: built-in defaults, JSON config file,
//! environment variables, explicit overrides (CLI flags).

use std::path::Path;

use serde::{Deserialize, Serialize};

pub const DEFAULT_EVALUATOR_A_MODEL: &str = "openai/o4-mini";
pub const DEFAULT_EVALUATOR_B_MODEL: &str = "google/gemini-2.5-pro";
pub const DEFAULT_ARBITER_MODEL: &str = "openai/o4-mini";

pub const ENV_EVALUATOR_A_MODEL: &str = "ASSESS_EVALUATOR_A_MODEL";
pub const ENV_EVALUATOR_B_MODEL: &str = "ASSESS_EVALUATOR_B_MODEL";
pub const ENV_ARBITER_MODEL: &str = "ASSESS_ARBITER_MODEL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PanelConfig {
    pub evaluator_a_model: String,
    pub evaluator_b_model: String,
    pub arbiter_model: String,
    /// Sampling temperature for all calls; `None` uses the provider default.
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            evaluator_a_model: DEFAULT_EVALUATOR_A_MODEL.to_string(),
            evaluator_b_model: DEFAULT_EVALUATOR_B_MODEL.to_string(),
            arbiter_model: DEFAULT_ARBITER_MODEL.to_string(),
            temperature: None,
            max_output_tokens: None,
        }
    }
}

/// Per-field overrides, typically from CLI flags.
#[derive(Debug, Clone, Default)]
pub struct PanelOverrides {
    pub evaluator_a_model: Option<String>,
    pub evaluator_b_model: Option<String>,
    pub arbiter_model: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read panel config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse panel config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid panel config: {0}")]
    Invalid(String),
}

impl PanelConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: PanelConfig = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Defaults or `path`, then env, then overrides; validated.
    pub fn resolve(
        path: Option<&Path>,
        overrides: PanelOverrides,
    ) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_path(p)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup(ENV_EVALUATOR_A_MODEL) {
            self.evaluator_a_model = v;
        }
        if let Some(v) = lookup(ENV_EVALUATOR_B_MODEL) {
            self.evaluator_b_model = v;
        }
        if let Some(v) = lookup(ENV_ARBITER_MODEL) {
            self.arbiter_model = v;
        }
    }

    fn apply_overrides(&mut self, overrides: PanelOverrides) {
        if let Some(v) = overrides.evaluator_a_model {
            self.evaluator_a_model = v;
        }
        if let Some(v) = overrides.evaluator_b_model {
            self.evaluator_b_model = v;
        }
        if let Some(v) = overrides.arbiter_model {
            self.arbiter_model = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, model) in [
            ("evaluator_a_model", &self.evaluator_a_model),
            ("evaluator_b_model", &self.evaluator_b_model),
            ("arbiter_model", &self.arbiter_model),
        ] {
            if model.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
            }
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::Invalid("temperature must be in [0,2]".into()));
            }
        }
        if matches!(self.max_output_tokens, Some(0)) {
            return Err(ConfigError::Invalid("max_output_tokens must be >= 1".into()));
        }
        Ok(())
    }
}
