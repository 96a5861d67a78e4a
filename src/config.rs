//! Engine configuration
//!
//! Built once at process start from defaults, an optional TOML file, and
//! `RLM_*` environment overrides, then shared immutably behind an `Arc`.
//! No engine operation can change it.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::budget::BudgetLimits;
use crate::error::{RlmError, RlmResult};
use crate::logging::LoggingConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ceilings applied to every new session.
    pub budget: BudgetLimits,
    pub sandbox: SandboxConfig,
    pub sub_query: SubQueryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock deadline for one program.
    pub timeout_ms: u64,
    /// How long the watchdog waits for an interrupted worker before
    /// detaching it.
    pub grace_ms: u64,
    /// Output cap; longer output keeps its head and gets a marker.
    pub max_output_chars: usize,
    /// Glob patterns over `capability:operation` (e.g. `text:*`,
    /// `search:grep`). Capabilities outside the grantable set are refused
    /// regardless of this list.
    pub allow: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            grace_ms: 250,
            max_output_chars: 50_000,
            allow: ["read:*", "search:*", "chunk:*", "cite:*", "text:*", "control:*"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubQueryConfig {
    /// Backend name that wins over automatic selection (`api`, `claude`,
    /// `codex`, `gemini`, or a registered adapter name).
    pub backend: Option<String>,
    /// API key for the HTTP backend. Never serialized.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    pub model: String,
    pub system_prompt: String,
    pub api_timeout_ms: u64,
    pub cli_timeout_ms: u64,
    /// Cap on captured CLI stdout.
    pub cli_max_output_chars: usize,
    /// Context slices are cut to this many chars before dispatch.
    pub max_context_chars: usize,
    pub max_output_tokens: u32,
    /// Charged when a backend reports no usage.
    pub fallback_tokens_per_call: u64,
    pub fallback_cost_per_call: f64,
    /// USD per million tokens, used to price reported usage when the
    /// backend does not report cost.
    pub input_cost_per_mtok: f64,
    pub output_cost_per_mtok: f64,
}

impl Default for SubQueryConfig {
    fn default() -> Self {
        Self {
            backend: None,
            api_key: None,
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            system_prompt: "You are a focused sub-agent. Answer the question using only the \
                provided context. Be concise and cite line numbers when they are visible."
                .into(),
            api_timeout_ms: 60_000,
            cli_timeout_ms: 120_000,
            cli_max_output_chars: 50_000,
            max_context_chars: 100_000,
            max_output_tokens: 1_024,
            fallback_tokens_per_call: 2_000,
            fallback_cost_per_call: 0.01,
            input_cost_per_mtok: 0.15,
            output_cost_per_mtok: 0.60,
        }
    }
}

impl SubQueryConfig {
    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout_ms)
    }

    pub fn cli_timeout(&self) -> Duration {
        Duration::from_millis(self.cli_timeout_ms)
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> RlmResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| RlmError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> RlmResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            RlmError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Defaults, then the file (if given), then environment overrides.
    pub fn load(path: Option<&Path>) -> RlmResult<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RLM_*` overrides. `lookup` abstracts the environment so the
    /// rules can be tested without touching process state.
    pub fn apply_env<F>(&mut self, lookup: F) -> RlmResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RLM_SUB_QUERY_BACKEND").filter(|v| !v.trim().is_empty()) {
            let name = v.trim().to_ascii_lowercase();
            // `auto` keeps the default order.
            self.sub_query.backend = (name != "auto").then_some(name);
        }
        if let Some(v) = lookup("RLM_SUB_QUERY_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            if !v.trim().is_empty() {
                self.sub_query.api_key = Some(v.trim().to_string());
            }
        }
        if let Some(v) = lookup("RLM_SUB_QUERY_URL").or_else(|| lookup("OPENAI_BASE_URL")) {
            self.sub_query.base_url = v.trim().trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("RLM_SUB_QUERY_MODEL") {
            self.sub_query.model = v.trim().to_string();
        }
        if let Some(v) = lookup("RLM_EXEC_TIMEOUT_MS") {
            self.sandbox.timeout_ms = parse_env("RLM_EXEC_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("RLM_MAX_OUTPUT_CHARS") {
            self.sandbox.max_output_chars = parse_env("RLM_MAX_OUTPUT_CHARS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> RlmResult<()> {
        if self.sandbox.timeout_ms == 0 {
            return Err(RlmError::Config("sandbox.timeout_ms must be positive".into()));
        }
        if self.sandbox.max_output_chars == 0 {
            return Err(RlmError::Config(
                "sandbox.max_output_chars must be positive".into(),
            ));
        }
        if self.sub_query.max_context_chars == 0 {
            return Err(RlmError::Config(
                "sub_query.max_context_chars must be positive".into(),
            ));
        }
        if self.sub_query.fallback_cost_per_call < 0.0 {
            return Err(RlmError::Config(
                "sub_query.fallback_cost_per_call must not be negative".into(),
            ));
        }
        if let Some(cost) = self.budget.max_cost_usd {
            if cost.is_nan() || cost < 0.0 {
                return Err(RlmError::Config("budget.max_cost_usd must not be negative".into()));
            }
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> RlmResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RlmError::Config(format!("{key}: cannot parse \"{value}\"")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sandbox.max_output_chars, 50_000);
        assert_eq!(config.budget.max_depth, 2);
        assert!(config.sandbox.allow.iter().any(|p| p == "text:*"));
    }

    #[test]
    fn toml_overrides_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            [budget]
            max_iterations = 40
            max_depth = 3

            [sandbox]
            timeout_ms = 500
            allow = ["read:*", "control:*"]

            [sub_query]
            backend = "claude"
            "#,
        )
        .unwrap();
        assert_eq!(config.budget.max_iterations, Some(40));
        assert_eq!(config.budget.max_depth, 3);
        assert_eq!(config.sandbox.timeout(), Duration::from_millis(500));
        assert_eq!(config.sandbox.grace_ms, 250);
        assert_eq!(config.sandbox.allow.len(), 2);
        assert_eq!(config.sub_query.backend.as_deref(), Some("claude"));
        assert_eq!(config.sub_query.max_context_chars, 100_000);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = EngineConfig::from_toml_str("[sandbox\ntimeout_ms = 1").unwrap_err();
        assert!(matches!(err, RlmError::Config(_)));
        let err = EngineConfig::from_toml_str("[sandbox]\ntimeout_ms = 0").unwrap_err();
        assert!(matches!(err, RlmError::Config(_)));
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            ("RLM_SUB_QUERY_BACKEND", " API "),
            ("OPENAI_API_KEY", "sk-test"),
            ("RLM_SUB_QUERY_URL", "http://localhost:8080/v1/"),
            ("RLM_EXEC_TIMEOUT_MS", "1500"),
            ("RLM_MAX_OUTPUT_CHARS", "100"),
        ]
        .into_iter()
        .collect();
        let mut config = EngineConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.sub_query.backend.as_deref(), Some("api"));
        assert_eq!(config.sub_query.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.sub_query.base_url, "http://localhost:8080/v1");
        assert_eq!(config.sandbox.timeout_ms, 1500);
        assert_eq!(config.sandbox.max_output_chars, 100);
    }

    #[test]
    fn specific_api_key_wins_over_generic() {
        let mut config = EngineConfig::default();
        config
            .apply_env(|k| match k {
                "RLM_SUB_QUERY_API_KEY" => Some("specific".into()),
                "OPENAI_API_KEY" => Some("generic".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.sub_query.api_key.as_deref(), Some("specific"));
    }

    #[test]
    fn auto_backend_is_no_override() {
        let mut config = EngineConfig::default();
        config.sub_query.backend = Some("claude".into());
        config
            .apply_env(|k| (k == "RLM_SUB_QUERY_BACKEND").then(|| "Auto".to_string()))
            .unwrap();
        assert_eq!(config.sub_query.backend, None);
    }

    #[test]
    fn openai_base_url_is_the_url_fallback() {
        let mut config = EngineConfig::default();
        config
            .apply_env(|k| (k == "OPENAI_BASE_URL").then(|| "http://proxy:9000/v1/".to_string()))
            .unwrap();
        assert_eq!(config.sub_query.base_url, "http://proxy:9000/v1");

        let mut config = EngineConfig::default();
        config
            .apply_env(|k| match k {
                "RLM_SUB_QUERY_URL" => Some("http://specific/v1".into()),
                "OPENAI_BASE_URL" => Some("http://generic/v1".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.sub_query.base_url, "http://specific/v1");
    }

    #[test]
    fn bad_env_number_fails() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_env(|k| (k == "RLM_EXEC_TIMEOUT_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("RLM_EXEC_TIMEOUT_MS"));
    }

    #[test]
    fn api_key_is_not_serialized() {
        let mut config = EngineConfig::default();
        config.sub_query.api_key = Some("secret".into());
        let text = toml::to_string(&config).unwrap();
        assert!(!text.contains("secret"));
    }
}
