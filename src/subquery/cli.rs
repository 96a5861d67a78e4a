//! Local CLI agents (`claude`, `codex`, `gemini`) as sub-query backends.
//!
//! The prompt goes in on stdin and the answer is read from stdout. The child
//! runs in its own process group with `kill_on_drop`; if the call is dropped
//! (timeout or cancellation) the whole group is killed, so helper processes
//! the agent spawned do not outlive it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use super::{truncate_chars, BackendAdapter, BackendResponse, SubQueryCall};
use crate::config::SubQueryConfig;
use crate::error::{RlmError, RlmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliAgent {
    Claude,
    Codex,
    Gemini,
}

impl CliAgent {
    /// Selection order after the HTTP backend.
    pub const ALL: [CliAgent; 3] = [CliAgent::Claude, CliAgent::Codex, CliAgent::Gemini];

    pub fn binary(self) -> &'static str {
        match self {
            CliAgent::Claude => "claude",
            CliAgent::Codex => "codex",
            CliAgent::Gemini => "gemini",
        }
    }

    /// Arguments for one-shot, non-interactive use with the prompt on stdin.
    fn args(self) -> &'static [&'static str] {
        match self {
            CliAgent::Claude => &["-p"],
            CliAgent::Codex => &["exec", "-"],
            CliAgent::Gemini => &[],
        }
    }
}

pub struct CliBackend {
    name: String,
    program: String,
    args: Vec<String>,
    timeout: Duration,
    max_output_chars: usize,
}

impl CliBackend {
    pub fn new(agent: CliAgent, config: &SubQueryConfig) -> Self {
        Self::custom(
            agent.binary(),
            agent.binary(),
            agent.args().iter().map(|a| a.to_string()).collect(),
            config,
        )
    }

    /// Any program that reads a prompt on stdin and answers on stdout.
    pub fn custom(
        name: impl Into<String>,
        program: impl Into<String>,
        args: Vec<String>,
        config: &SubQueryConfig,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            timeout: config.cli_timeout(),
            max_output_chars: config.cli_max_output_chars,
        }
    }

    fn locate(&self) -> Option<PathBuf> {
        find_program(&self.program)
    }
}

/// Resolve a program the way a shell would: paths are taken as-is, bare
/// names are looked up on `PATH`.
fn find_program(program: &str) -> Option<PathBuf> {
    let as_path = Path::new(program);
    if as_path.components().count() > 1 {
        return is_executable(as_path).then(|| as_path.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Kills the child's process group when dropped, unless disarmed.
struct ProcessGroupGuard {
    pid: Option<u32>,
}

impl ProcessGroupGuard {
    fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            // SAFETY: kill(2) with a negative pid signals a process group;
            // it has no memory-safety preconditions.
            unsafe {
                libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
            }
            tracing::debug!(pid, "killed sub-query process group");
        }
    }
}

async fn read_pipe(pipe: Option<impl tokio::io::AsyncRead + Unpin>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut p) = pipe {
        let _ = p.read_to_end(&mut buf).await;
    }
    buf
}

#[async_trait]
impl BackendAdapter for CliBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.locate().is_some()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(&self, call: SubQueryCall<'_>) -> RlmResult<BackendResponse> {
        let program = self.locate().ok_or_else(|| {
            RlmError::BackendUnavailable(format!("{} not found on PATH", self.program))
        })?;
        let input = if call.system_prompt.is_empty() {
            call.user_message()
        } else {
            format!("{}\n\n{}", call.system_prompt, call.user_message())
        };

        let mut cmd = Command::new(&program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| RlmError::Backend {
            backend: self.name.clone(),
            message: format!("failed to spawn {}: {e}", program.display()),
        })?;
        let mut group = ProcessGroupGuard { pid: child.id() };

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let write = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(input.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (written, status, stdout, stderr) = tokio::join!(
            write,
            child.wait(),
            read_pipe(stdout),
            read_pipe(stderr),
        );
        let status = status?;
        group.disarm();

        if let Err(e) = written {
            tracing::debug!(backend = %self.name, error = %e, "sub-query stdin closed early");
        }

        let stderr = String::from_utf8_lossy(&stderr);
        if !status.success() {
            return Err(RlmError::Backend {
                backend: self.name.clone(),
                message: format!(
                    "exit code {}: {}",
                    status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&stdout);
        let text = stdout.trim();
        if text.is_empty() {
            return Err(RlmError::Backend {
                backend: self.name.clone(),
                message: "empty response".into(),
            });
        }
        let (text, cut) = truncate_chars(text, self.max_output_chars);
        if cut {
            tracing::debug!(backend = %self.name, cap = self.max_output_chars, "sub-query output truncated");
        }
        Ok(BackendResponse::text(text))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::budget::CallFrame;
    use crate::subquery::{NestedQuery, SubQueryOutcome, SubQueryRequest};
    use std::time::Instant;

    struct NoNesting;

    #[async_trait]
    impl NestedQuery for NoNesting {
        async fn query(&self, _: &CallFrame, _: SubQueryRequest) -> RlmResult<SubQueryOutcome> {
            Err(RlmError::InvalidArgument("nesting disabled".into()))
        }
    }

    fn call<'a>(nested: &'a NoNesting, prompt: &'a str) -> SubQueryCall<'a> {
        SubQueryCall {
            system_prompt: "",
            prompt,
            context_slice: None,
            frame: CallFrame { depth: 1, limit: 2 },
            nested,
        }
    }

    fn sh(script: &str) -> CliBackend {
        CliBackend::custom(
            "sh",
            "sh",
            vec!["-c".into(), script.into()],
            &SubQueryConfig {
                cli_max_output_chars: 8,
                ..SubQueryConfig::default()
            },
        )
    }

    #[test]
    fn missing_binary_is_unavailable() {
        let backend = CliBackend::custom(
            "ghost",
            "definitely-not-a-real-agent-binary",
            vec![],
            &SubQueryConfig::default(),
        );
        assert!(!backend.is_available());
    }

    #[tokio::test]
    async fn prompt_goes_in_on_stdin() {
        let backend = sh("cat");
        assert!(backend.is_available());
        let response = backend.invoke(call(&NoNesting, "ping")).await.unwrap();
        assert_eq!(response.text, "ping");
        assert!(response.usage.is_none());
    }

    #[tokio::test]
    async fn output_is_capped() {
        let response = sh("echo 0123456789abcdef")
            .invoke(call(&NoNesting, "x"))
            .await
            .unwrap();
        assert_eq!(response.text, "01234567");
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_backend_error() {
        let err = sh("echo bad >&2; exit 3")
            .invoke(call(&NoNesting, "x"))
            .await
            .unwrap_err();
        match err {
            RlmError::Backend { message, .. } => {
                assert!(message.contains("exit code 3"));
                assert!(message.contains("bad"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn dropped_call_does_not_wait_for_the_child() {
        let backend = sh("sleep 30 & sleep 30");
        let started = Instant::now();
        let result =
            tokio::time::timeout(Duration::from_millis(200), backend.invoke(call(&NoNesting, "x")))
                .await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    /// Running, as opposed to gone or a zombie nobody reaped yet.
    fn process_running(pid: i32) -> bool {
        // SAFETY: signal 0 only checks that the process exists.
        if unsafe { libc::kill(pid, 0) } != 0 {
            return false;
        }
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.split_whitespace().next())
                .map_or(false, |state| state != "Z"),
            Err(_) => true,
        }
    }

    #[tokio::test]
    async fn dropped_call_kills_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("helper.pid");
        let backend = sh(&format!("sleep 30 & echo $! > {}; wait", pid_file.display()));

        let result =
            tokio::time::timeout(Duration::from_millis(300), backend.invoke(call(&NoNesting, "x")))
                .await;
        assert!(result.is_err());

        let pid: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while process_running(pid) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!process_running(pid), "helper process {pid} outlived the call");
    }
}
