use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{BackendAdapter, BackendResponse, SubQueryCall, SubQueryRequest};
use crate::error::{RlmError, RlmResult};
use crate::types::TokenUsage;

/// One canned step of a [`ScriptedBackend`].
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text {
        text: String,
        usage: Option<TokenUsage>,
        cost_usd: Option<f64>,
    },
    /// Fail with a backend error carrying this message.
    Error(String),
    /// Issue a nested sub-query with this prompt and answer with its text.
    Recurse(String),
    /// Answer with this text after a pause.
    Delayed(Duration, String),
    /// Never answer; the dispatcher's timeout ends the call.
    Hang,
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedReply::Text {
            text: text.into(),
            usage: None,
            cost_usd: None,
        }
    }
}

/// A call seen by a [`ScriptedBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub prompt: String,
    pub context_slice: Option<String>,
    pub depth: u32,
}

/// Offline backend with canned replies, for tests and dry runs. Once the
/// script runs out it echoes the prompt.
pub struct ScriptedBackend {
    name: String,
    available: bool,
    timeout: Duration,
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available: true,
            timeout: Duration::from_secs(30),
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_replies(self, replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        self.lock_replies().extend(replies);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<ScriptedReply>> {
        self.replies.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BackendAdapter for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self, call: SubQueryCall<'_>) -> RlmResult<BackendResponse> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                prompt: call.prompt.to_string(),
                context_slice: call.context_slice.map(str::to_string),
                depth: call.frame.depth,
            });
        let reply = self.lock_replies().pop_front();

        match reply {
            None => Ok(BackendResponse::text(format!("[{}] {}", self.name, call.prompt))),
            Some(ScriptedReply::Text {
                text,
                usage,
                cost_usd,
            }) => Ok(BackendResponse {
                text,
                usage,
                cost_usd,
            }),
            Some(ScriptedReply::Error(message)) => Err(RlmError::Backend {
                backend: self.name.clone(),
                message,
            }),
            Some(ScriptedReply::Recurse(prompt)) => {
                let inner = call
                    .nested
                    .query(&call.frame, SubQueryRequest::new(prompt))
                    .await?;
                Ok(BackendResponse {
                    text: inner.text,
                    usage: Some(TokenUsage::default()),
                    cost_usd: Some(0.0),
                })
            }
            Some(ScriptedReply::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(BackendResponse::text(text))
            }
            Some(ScriptedReply::Hang) => {
                std::future::pending::<()>().await;
                Ok(BackendResponse::default())
            }
        }
    }
}
