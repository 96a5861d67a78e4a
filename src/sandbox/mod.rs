//! Restricted execution environment.
//!
//! Programs are written in the line-oriented language in [`dsl`], checked
//! against a [`CapabilityPolicy`] before anything runs, and interpreted on a
//! blocking worker bound to one context. A watchdog enforces the wall-clock
//! deadline: at expiry it raises the interrupt flag the interpreter polls,
//! waits a short grace period, and returns whether or not the worker has
//! stopped.

pub mod capability;
pub mod dsl;
mod interpreter;
mod output;
mod value;

pub use capability::{Capability, CapabilityPolicy};
pub use dsl::{DslError, DslParser, Program, CONTEXT_VAR};
pub use interpreter::DEFAULT_SEARCH_LIMIT;
pub use value::Variable;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::SandboxConfig;
use crate::context::Context;
use crate::error::{RlmError, RlmResult};
use crate::evidence::{Citation, EvidenceItem};
use interpreter::Interpreter;
use output::SharedOutput;

/// Result of one program run, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: String,
    pub truncated: bool,
    /// Names written by the program, with their final values.
    pub bindings: BTreeMap<String, Variable>,
    pub final_answer: Option<String>,
    /// Evidence recorded by `CITE` / `CITE_LINES`.
    pub citations: Vec<EvidenceItem>,
    /// Runtime fault that stopped the program, if any.
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// A finished run whose citations have not been recorded yet.
#[derive(Debug)]
pub struct SandboxRun {
    pub output: String,
    pub truncated: bool,
    pub bindings: BTreeMap<String, Variable>,
    pub final_answer: Option<String>,
    pub citations: Vec<Citation>,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl SandboxRun {
    pub fn into_result(self, citations: Vec<EvidenceItem>) -> ExecutionResult {
        ExecutionResult {
            output: self.output,
            truncated: self.truncated,
            bindings: self.bindings,
            final_answer: self.final_answer,
            citations,
            error: self.error,
            elapsed_ms: self.elapsed.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sandbox {
    policy: CapabilityPolicy,
    timeout: Duration,
    grace: Duration,
    max_output_chars: usize,
}

impl Sandbox {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            policy: CapabilityPolicy::new(config.allow.iter().cloned()),
            timeout: config.timeout(),
            grace: config.grace(),
            max_output_chars: config.max_output_chars,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Parse and capability-check a program without running it.
    pub fn prepare(&self, source: &str) -> RlmResult<Program> {
        let program = DslParser::parse(source).map_err(|e| RlmError::ExecutionFault {
            line: e.line,
            message: e.message,
        })?;
        self.policy.check(&program)?;
        Ok(program)
    }

    /// Run `source` against `context` with the session's current variables.
    pub async fn run(
        &self,
        source: &str,
        context: Context,
        variables: BTreeMap<String, Variable>,
    ) -> RlmResult<SandboxRun> {
        let program = self.prepare(source)?;
        let started = Instant::now();
        let output = SharedOutput::new(self.max_output_chars);
        let interrupt = Arc::new(AtomicBool::new(false));
        let context_id = context.id().to_string();

        let interpreter = Interpreter::new(
            context,
            variables,
            output.clone(),
            interrupt.clone(),
            started + self.timeout,
        );
        let mut worker = tokio::task::spawn_blocking(move || interpreter.run(&program));

        let joined = match tokio::time::timeout(self.timeout, &mut worker).await {
            Ok(joined) => Some(joined),
            Err(_) => {
                interrupt.store(true, Ordering::SeqCst);
                if tokio::time::timeout(self.grace, &mut worker).await.is_err() {
                    tracing::warn!(
                        context_id = %context_id,
                        grace_ms = self.grace.as_millis() as u64,
                        "sandbox worker still running after grace period, detaching"
                    );
                }
                None
            }
        };
        let elapsed = started.elapsed();

        let outcome = match joined {
            Some(Ok(outcome)) if !outcome.interrupted => outcome,
            Some(Err(e)) => {
                return Err(RlmError::ExecutionFault {
                    line: 0,
                    message: format!("interpreter worker failed: {e}"),
                })
            }
            _ => {
                let (partial_output, _) = output.render();
                tracing::warn!(
                    context_id = %context_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "sandbox execution timed out"
                );
                return Err(RlmError::ExecutionTimeout {
                    timeout: self.timeout,
                    partial_output,
                });
            }
        };

        let (text, truncated) = output.render();
        tracing::debug!(
            context_id = %context_id,
            elapsed_ms = elapsed.as_millis() as u64,
            bindings = outcome.bindings.len(),
            citations = outcome.citations.len(),
            faulted = outcome.error.is_some(),
            "sandbox execution finished"
        );
        Ok(SandboxRun {
            output: text,
            truncated,
            bindings: outcome.bindings,
            final_answer: outcome.final_answer,
            citations: outcome.citations,
            error: outcome.error,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox(timeout_ms: u64) -> Sandbox {
        Sandbox::new(&SandboxConfig {
            timeout_ms,
            grace_ms: 100,
            max_output_chars: 1_000,
            ..SandboxConfig::default()
        })
    }

    fn ctx(text: &str) -> Context {
        Context::new("doc", text, None)
    }

    #[tokio::test]
    async fn runs_a_program() {
        let run = sandbox(5_000)
            .run("LET n = LEN context\nPRINT n", ctx("hello"), BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(run.output, "5\n");
        assert!(!run.truncated);
        assert_eq!(run.bindings["n"], Variable::Number(5));
        assert!(run.error.is_none());
    }

    #[tokio::test]
    async fn infinite_loop_times_out_with_partial_output() {
        let started = Instant::now();
        let err = sandbox(200)
            .run("PRINT \"before\"\nLOOP\nEND", ctx("x"), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            RlmError::ExecutionTimeout {
                timeout,
                partial_output,
            } => {
                assert_eq!(timeout, Duration::from_millis(200));
                assert_eq!(partial_output, "before\n");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn parse_errors_are_faults() {
        let err = sandbox(1_000)
            .run("PRINT context\nLET = nope", ctx("x"), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RlmError::ExecutionFault { line: 2, .. }));
    }

    #[tokio::test]
    async fn denied_operation_runs_nothing() {
        let err = sandbox(1_000)
            .run(
                "PRINT \"side effect\"\nLET x = READ_FILE \"/etc/passwd\"",
                ctx("x"),
                BTreeMap::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RlmError::DeniedCapability { ref capability, .. } if capability == "filesystem"));
    }

    #[tokio::test]
    async fn output_is_capped() {
        let run = sandbox(5_000)
            .run(
                "REPEAT 500\n  PRINT \"0123456789\"\nEND",
                ctx("x"),
                BTreeMap::new(),
            )
            .await
            .unwrap();
        assert!(run.truncated);
        assert!(run.output.ends_with("[output truncated at 1000 chars]"));
    }
}
