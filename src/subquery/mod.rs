//! Sub-query dispatcher — bounded recursive tasks handed to a reasoning
//! backend.
//!
//! Backends implement [`BackendAdapter`]. The dispatcher picks one with
//! [`select_backend`], authorizes the call against the session budget (one
//! depth level, one sub-query, token/cost/wall-time admission), runs it
//! under the adapter's timeout, and folds the reported consumption back
//! into the budget whether the call succeeded or not. Adapters get a
//! [`NestedQuery`] handle so a sub-query can issue its own sub-queries one
//! level deeper against the same budget.

pub mod api;
#[cfg(feature = "native")]
pub mod cli;
pub mod scripted;

pub use api::ApiBackend;
#[cfg(feature = "native")]
pub use cli::{CliAgent, CliBackend};
pub use scripted::{RecordedCall, ScriptedBackend, ScriptedReply};

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::budget::{BudgetController, BudgetKind, CallFrame};
use crate::config::SubQueryConfig;
use crate::error::{RlmError, RlmResult};
use crate::types::TokenUsage;

/// A sub-query as issued by a caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubQueryRequest {
    pub prompt: String,
    /// Text the backend should reason over. Truncated before dispatch.
    pub context_slice: Option<String>,
    /// Force a backend by name for this call.
    pub backend: Option<String>,
    /// Further levels the sub-query's own subtree may use.
    pub depth_budget: Option<u32>,
}

impl SubQueryRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_context(mut self, slice: impl Into<String>) -> Self {
        self.context_slice = Some(slice.into());
        self
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn with_depth_budget(mut self, levels: u32) -> Self {
        self.depth_budget = Some(levels);
        self
    }
}

/// What a backend receives.
pub struct SubQueryCall<'a> {
    pub system_prompt: &'a str,
    pub prompt: &'a str,
    pub context_slice: Option<&'a str>,
    /// Frame the sub-query runs in; nested calls go one level below it.
    pub frame: CallFrame,
    pub nested: &'a dyn NestedQuery,
}

impl SubQueryCall<'_> {
    /// Prompt and context slice as one user message.
    pub fn user_message(&self) -> String {
        match self.context_slice {
            Some(slice) if !slice.is_empty() => {
                format!("{}\n\n---\nCONTEXT:\n{}", self.prompt, slice)
            }
            _ => self.prompt.to_string(),
        }
    }
}

/// Raw answer of a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendResponse {
    pub text: String,
    pub usage: Option<TokenUsage>,
    pub cost_usd: Option<f64>,
}

impl BackendResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap local check: credentials present, binary on `PATH`, ...
    fn is_available(&self) -> bool;

    /// Hard limit applied by the dispatcher around [`invoke`](Self::invoke).
    fn timeout(&self) -> Duration;

    async fn invoke(&self, call: SubQueryCall<'_>) -> RlmResult<BackendResponse>;
}

/// Handle adapters use to recurse.
#[async_trait]
pub trait NestedQuery: Send + Sync {
    async fn query(&self, parent: &CallFrame, request: SubQueryRequest) -> RlmResult<SubQueryOutcome>;
}

/// Result of a dispatched sub-query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQueryOutcome {
    pub text: String,
    pub backend: String,
    pub depth: u32,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    /// True when usage was not reported and the fixed estimate was charged.
    pub estimated: bool,
    pub context_truncated: bool,
    pub elapsed_ms: u64,
}

/// Pick the adapter for a call.
///
/// An override must name a known, available adapter. Without one (or with
/// `auto`) the first available adapter in order wins.
pub fn select_backend<'a>(
    adapters: &'a [Arc<dyn BackendAdapter>],
    override_name: Option<&str>,
) -> RlmResult<&'a Arc<dyn BackendAdapter>> {
    match override_name.filter(|name| !name.eq_ignore_ascii_case("auto")) {
        Some(name) => {
            let adapter = adapters
                .iter()
                .find(|a| a.name().eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    RlmError::BackendUnavailable(format!("unknown backend \"{name}\""))
                })?;
            if !adapter.is_available() {
                return Err(RlmError::BackendUnavailable(format!(
                    "backend \"{name}\" is not available"
                )));
            }
            Ok(adapter)
        }
        None => adapters.iter().find(|a| a.is_available()).ok_or_else(|| {
            let names: Vec<&str> = adapters.iter().map(|a| a.name()).collect();
            RlmError::BackendUnavailable(format!("no backend available (tried {names:?})"))
        }),
    }
}

/// Keep the first `max_chars` characters. Returns whether anything was cut.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => (&text[..byte], true),
        None => (text, false),
    }
}

/// Ordered backends plus the dispatch policy. Shared by every session.
pub struct Dispatcher {
    adapters: Vec<Arc<dyn BackendAdapter>>,
    config: Arc<SubQueryConfig>,
}

impl Dispatcher {
    pub fn new(config: Arc<SubQueryConfig>) -> Self {
        Self {
            adapters: Vec::new(),
            config,
        }
    }

    /// The default order: HTTP API first, then local CLI agents.
    pub fn with_default_backends(config: Arc<SubQueryConfig>) -> RlmResult<Self> {
        let mut dispatcher = Self::new(config.clone());
        dispatcher.add_adapter(Arc::new(ApiBackend::from_config(&config)?));
        #[cfg(feature = "native")]
        for agent in CliAgent::ALL {
            dispatcher.add_adapter(Arc::new(CliBackend::new(agent, &config)));
        }
        Ok(dispatcher)
    }

    pub fn add_adapter(&mut self, adapter: Arc<dyn BackendAdapter>) {
        self.adapters.push(adapter);
    }

    pub fn adapters(&self) -> &[Arc<dyn BackendAdapter>] {
        &self.adapters
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name().to_string()).collect()
    }

    /// Run one sub-query below `parent`, charging `budget`.
    pub async fn dispatch(
        &self,
        budget: &BudgetController,
        parent: &CallFrame,
        request: SubQueryRequest,
    ) -> RlmResult<SubQueryOutcome> {
        let override_name = request.backend.as_deref().or(self.config.backend.as_deref());
        let adapter = select_backend(&self.adapters, override_name)?;

        let guard = budget.enter(parent, request.depth_budget)?;
        for kind in [
            BudgetKind::SubQueries,
            BudgetKind::Tokens,
            BudgetKind::Cost,
            BudgetKind::WallTime,
        ] {
            budget.check(kind)?;
        }
        budget.consume(BudgetKind::SubQueries, 1.0);

        let frame = guard.frame();
        let (slice, context_truncated) = match request.context_slice.as_deref() {
            Some(text) => {
                let (kept, cut) = truncate_chars(text, self.config.max_context_chars);
                (Some(kept), cut)
            }
            None => (None, false),
        };
        let nested = NestedDispatch {
            dispatcher: self,
            budget,
            spent: Mutex::new(Duration::ZERO),
        };
        let call = SubQueryCall {
            system_prompt: &self.config.system_prompt,
            prompt: &request.prompt,
            context_slice: slice,
            frame,
            nested: &nested,
        };

        let timeout = adapter.timeout();
        let started = Instant::now();
        tracing::debug!(
            backend = adapter.name(),
            depth = frame.depth,
            context_truncated,
            "dispatching sub-query"
        );
        let result = match tokio::time::timeout(timeout, adapter.invoke(call)).await {
            Ok(result) => result,
            Err(_) => Err(RlmError::BackendTimeout {
                backend: adapter.name().to_string(),
                timeout,
            }),
        };
        let elapsed = started.elapsed();
        // Nested calls charged their own time.
        budget.charge_elapsed(elapsed.saturating_sub(nested.spent()));

        let reported = result.as_ref().ok();
        let (usage, cost_usd, estimated) = self.consumption(reported);
        budget.consume(BudgetKind::Tokens, usage.total() as f64);
        budget.consume(BudgetKind::Cost, cost_usd);
        drop(guard);

        match result {
            Ok(response) => {
                tracing::info!(
                    backend = adapter.name(),
                    depth = frame.depth,
                    tokens = usage.total(),
                    cost_usd,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "sub-query completed"
                );
                Ok(SubQueryOutcome {
                    text: response.text,
                    backend: adapter.name().to_string(),
                    depth: frame.depth,
                    usage,
                    cost_usd,
                    estimated,
                    context_truncated,
                    elapsed_ms: elapsed.as_millis() as u64,
                })
            }
            Err(e) => {
                tracing::warn!(
                    backend = adapter.name(),
                    depth = frame.depth,
                    error = %e,
                    "sub-query failed"
                );
                Err(e)
            }
        }
    }

    /// Usage and cost to charge for a finished call.
    fn consumption(&self, response: Option<&BackendResponse>) -> (TokenUsage, f64, bool) {
        let config = &self.config;
        match response.and_then(|r| r.usage.map(|u| (u, r.cost_usd))) {
            Some((usage, cost)) => {
                let cost = cost.unwrap_or_else(|| {
                    (usage.input_tokens as f64 * config.input_cost_per_mtok
                        + usage.output_tokens as f64 * config.output_cost_per_mtok)
                        / 1_000_000.0
                });
                (usage, cost, false)
            }
            None => {
                let usage = TokenUsage::new(config.fallback_tokens_per_call, 0);
                let cost = response
                    .and_then(|r| r.cost_usd)
                    .unwrap_or(config.fallback_cost_per_call);
                (usage, cost, true)
            }
        }
    }
}

struct NestedDispatch<'a> {
    dispatcher: &'a Dispatcher,
    budget: &'a BudgetController,
    /// Running time of the nested calls issued so far.
    spent: Mutex<Duration>,
}

impl NestedDispatch<'_> {
    fn spent(&self) -> Duration {
        *self.spent.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl NestedQuery for NestedDispatch<'_> {
    async fn query(&self, parent: &CallFrame, request: SubQueryRequest) -> RlmResult<SubQueryOutcome> {
        let started = Instant::now();
        let result = self.dispatcher.dispatch(self.budget, parent, request).await;
        *self.spent.lock().unwrap_or_else(|e| e.into_inner()) += started.elapsed();
        result
    }
}
