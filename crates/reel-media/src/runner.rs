//! Bounded-time subprocess execution.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::histogram;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Diagnostics attached to errors are cut to this many trailing bytes.
const MAX_OUTPUT_BYTES: usize = 16 * 1024;

const DRAIN_AFTER_KILL: Duration = Duration::from_secs(2);

/// One external tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            working_dir: None,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Program name without any directory, for logs and metrics.
    pub fn tool_name(&self) -> &str {
        self.program
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.program)
    }
}

/// Captured result of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ToolOutput {
    /// stderr followed by stdout, trimmed to the diagnostic limit.
    pub fn combined(&self) -> String {
        let mut text = String::with_capacity(self.stderr.len() + self.stdout.len() + 1);
        text.push_str(&self.stderr);
        if !self.stderr.is_empty() && !self.stdout.is_empty() {
            text.push('\n');
        }
        text.push_str(&self.stdout);
        tail(&text, MAX_OUTPUT_BYTES).to_string()
    }
}

fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Runs external tools. Non-zero exit and timeout are errors; output is
/// only parsed by callers for diagnostics.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, invocation: &ToolInvocation) -> MediaResult<ToolOutput>;
}

/// `ToolRunner` backed by real subprocesses.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

async fn read_all<R>(pipe: Option<R>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!("Failed to drain tool output: {}", e);
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn collect(task: JoinHandle<String>, limit: Option<Duration>) -> String {
    match limit {
        Some(limit) => tokio::time::timeout(limit, task)
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default(),
        None => task.await.unwrap_or_default(),
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &ToolInvocation) -> MediaResult<ToolOutput> {
        let tool = invocation.tool_name().to_string();
        let program = which::which(&invocation.program)
            .map_err(|_| MediaError::ToolNotFound(invocation.program.clone()))?;

        debug!("Running {} {}", tool, invocation.args.join(" "));

        let mut command = Command::new(program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }

        let started = Instant::now();
        let mut child = command.spawn()?;

        // Drain both pipes concurrently so a chatty tool never blocks on a full pipe.
        let stdout_task = tokio::spawn(read_all(child.stdout.take()));
        let stderr_task = tokio::spawn(read_all(child.stderr.take()));

        let waited = tokio::time::timeout(invocation.timeout, child.wait()).await;
        let timed_out = waited.is_err();
        if timed_out {
            warn!(
                tool = %tool,
                "{} timed out after {} seconds, killing process",
                tool,
                invocation.timeout.as_secs()
            );
            if let Err(e) = child.kill().await {
                warn!(tool = %tool, "Failed to kill timed out process: {}", e);
            }
        }

        // A killed tool's children may still hold the pipes open.
        let drain_limit = timed_out.then_some(DRAIN_AFTER_KILL);
        let output = ToolOutput {
            stdout: collect(stdout_task, drain_limit).await,
            stderr: collect(stderr_task, drain_limit).await,
            exit_code: None,
        };

        let elapsed = started.elapsed().as_secs_f64();

        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                histogram!("reel_tool_duration_seconds", "tool" => tool.clone(), "status" => "timeout")
                    .record(elapsed);
                return Err(MediaError::Timeout {
                    tool,
                    args: invocation.args.clone(),
                    secs: invocation.timeout.as_secs(),
                    output: output.combined(),
                });
            }
        };

        let output = ToolOutput {
            exit_code: status.code(),
            ..output
        };

        if !status.success() {
            histogram!("reel_tool_duration_seconds", "tool" => tool.clone(), "status" => "failed")
                .record(elapsed);
            return Err(MediaError::tool_failed(
                tool,
                invocation.args.clone(),
                output.combined(),
                status.code(),
            ));
        }

        histogram!("reel_tool_duration_seconds", "tool" => tool.clone(), "status" => "ok")
            .record(elapsed);
        debug!(tool = %tool, elapsed_secs = elapsed, "Tool finished");
        Ok(output)
    }
}
