//! Structured logging via `tracing`.
//!
//! The engine only emits events; installing a subscriber is the embedding
//! process's choice. [`init`] installs a stderr subscriber with an
//! `EnvFilter` built from `RLM_LOG` or the configured level.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::error::{RlmError, RlmResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error, off
    pub level: String,
    /// text or json
    pub format: String,
    /// ANSI colors (text format only)
    pub color: bool,
    /// Per-module levels, e.g. `rlm_core::sandbox = "debug"`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
            color: false,
            modules: BTreeMap::new(),
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
///
/// `RLM_LOG` (an `EnvFilter` directive string) overrides the configured
/// level and modules; `RLM_LOG_FORMAT` overrides the format.
pub fn init(config: &LoggingConfig) -> RlmResult<()> {
    let filter = build_filter(config)?;
    let format = std::env::var("RLM_LOG_FORMAT").unwrap_or_else(|_| config.format.clone());

    let registry = Registry::default().with(filter);
    let result = match format.as_str() {
        "json" => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        "text" => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(config.color)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        other => {
            return Err(RlmError::Config(format!(
                "invalid log format: {other} (must be 'json' or 'text')"
            )))
        }
    };
    result.map_err(|e| RlmError::Config(format!("logging already initialized: {e}")))
}

fn build_filter(config: &LoggingConfig) -> RlmResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_env("RLM_LOG") {
        return Ok(filter);
    }
    directives(config)
}

fn directives(config: &LoggingConfig) -> RlmResult<EnvFilter> {
    let mut filter = EnvFilter::try_new(&config.level)
        .map_err(|e| RlmError::Config(format!("invalid log level {}: {e}", config.level)))?;
    for (module, level) in &config.modules {
        let directive = format!("{module}={level}")
            .parse()
            .map_err(|e| RlmError::Config(format!("invalid log directive: {e}")))?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}
