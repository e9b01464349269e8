//! Backend CLI invocation.
//!
//! The backend is an opaque text-in/text-out program run as
//! `<cli_path> [extra_args…] --print <prompt>`. Its environment is always
//! rewritten before launch: the API key variable is removed and the
//! subscription flag is set, so the CLI authenticates through the
//! subscription login instead of a key.
//!
//! Two modes:
//!
//! - [`Backend::complete`] waits for the process and returns all of stdout,
//!   bounded by `timeout_secs`.
//! - [`Backend::stream`] hands back stdout line by line through a bounded
//!   channel fed by a reader task. Dropping the stream kills the process.
//!
//! Neither mode returns an error. Failures become sentinel text
//! (`[Error: …]`) so the caller always has a completion to frame.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::config::BackendConfig;
use crate::error::BridgeError;

/// Lines of backend stdout, each with its trailing newline as read.
pub type LineStream = ReceiverStream<String>;

/// How long the reader task may wait to deliver a final sentinel line.
const SENTINEL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationStatus {
    Ok,
    Timeout,
    Error,
    /// The consumer went away before the process finished.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedOutput {
    pub text: String,
    pub status: InvocationStatus,
}

#[derive(Debug, Clone)]
pub struct Backend {
    program: PathBuf,
    extra_args: Vec<String>,
    strip_env: Vec<String>,
    set_env: BTreeMap<String, String>,
    timeout: Duration,
    stream_timeout: Duration,
    stream_buffer: usize,
}

impl Backend {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            program: config.cli_path.clone(),
            extra_args: config.extra_args.clone(),
            strip_env: config.strip_env.clone(),
            set_env: config.set_env.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            stream_timeout: Duration::from_secs(config.stream_timeout_secs),
            stream_buffer: config.stream_buffer.max(1),
        }
    }

    /// Override both wall-clock limits.
    pub fn with_timeouts(mut self, buffered: Duration, streaming: Duration) -> Self {
        self.timeout = buffered;
        self.stream_timeout = streaming;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// The process command for `prompt`, with the environment policy applied.
    pub fn command(&self, prompt: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.extra_args).arg("--print").arg(prompt);
        for key in &self.strip_env {
            cmd.env_remove(key);
        }
        for (key, value) in &self.set_env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run to completion and return stdout, or a sentinel on failure.
    pub async fn complete(&self, prompt: &str) -> BufferedOutput {
        match self.run_buffered(prompt).await {
            Ok(text) => BufferedOutput {
                text,
                status: InvocationStatus::Ok,
            },
            Err(e) => {
                warn!(error = %e, "backend invocation failed");
                let status = match e {
                    BridgeError::BackendTimeout(_) => InvocationStatus::Timeout,
                    _ => InvocationStatus::Error,
                };
                BufferedOutput {
                    text: e.sentinel(),
                    status,
                }
            }
        }
    }

    async fn run_buffered(&self, prompt: &str) -> Result<String, BridgeError> {
        let child = self
            .command(prompt)
            .spawn()
            .map_err(|e| BridgeError::BackendExecution(e.to_string()))?;

        // On timeout the child is dropped here and killed (kill_on_drop).
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(res) => res.map_err(|e| BridgeError::BackendExecution(e.to_string()))?,
            Err(_) => return Err(BridgeError::BackendTimeout(self.timeout)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stdout.trim().is_empty() {
                return Err(BridgeError::BackendExecution(format!(
                    "backend exited with {}: {}",
                    output.status,
                    stderr.trim()
                )));
            }
            warn!(status = %output.status, stderr = %stderr.trim(), "backend exited non-zero; keeping its output");
        }
        Ok(stdout)
    }

    /// Start the backend and return its stdout as a line stream.
    ///
    /// Must be called inside a tokio runtime. The stream ends when the
    /// process exits, after the streaming timeout (killed, one sentinel
    /// line), or after a launch failure (one sentinel line). The timeout
    /// covers the whole run, including the wait after stdout closes.
    pub fn stream(&self, prompt: &str) -> LineStream {
        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let cmd = self.command(prompt);
        let limit = self.stream_timeout;
        tokio::spawn(async move {
            let status = pump_lines(cmd, tx, limit).await;
            debug!(?status, "backend stream closed");
        });
        ReceiverStream::new(rx)
    }
}

async fn pump_lines(
    mut cmd: Command,
    tx: mpsc::Sender<String>,
    limit: Duration,
) -> InvocationStatus {
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            let err = BridgeError::BackendExecution(e.to_string());
            warn!(error = %err, "backend launch failed");
            send_final(&tx, err.sentinel()).await;
            return InvocationStatus::Error;
        }
    };

    let stderr_task = child.stderr.take().map(|s| tokio::spawn(drain(s)));
    let stdout = match child.stdout.take() {
        Some(s) => s,
        None => {
            let _ = child.kill().await;
            return InvocationStatus::Error;
        }
    };

    let mut reader = BufReader::new(stdout);
    let deadline = tokio::time::sleep(limit);
    tokio::pin!(deadline);

    let mut lines = 0usize;
    let status = loop {
        let mut buf = Vec::new();
        tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => match read {
                Ok(0) => break InvocationStatus::Ok,
                Ok(_) => {}
                Err(e) => {
                    let err = BridgeError::BackendExecution(e.to_string());
                    warn!(error = %err, "reading backend output failed");
                    send_final(&tx, err.sentinel()).await;
                    break InvocationStatus::Error;
                }
            },
            _ = tx.closed() => break InvocationStatus::Cancelled,
            _ = &mut deadline => break InvocationStatus::Timeout,
        }

        // Invalid UTF-8 is replaced, as in buffered mode.
        let line = String::from_utf8_lossy(&buf).into_owned();
        tokio::select! {
            sent = tx.send(line) => {
                if sent.is_err() {
                    break InvocationStatus::Cancelled;
                }
                lines += 1;
            }
            _ = &mut deadline => break InvocationStatus::Timeout,
        }
    };

    // Stdout may close while the process keeps running.
    let status = match status {
        InvocationStatus::Ok => tokio::select! {
            _ = finish(&mut child) => InvocationStatus::Ok,
            _ = tx.closed() => InvocationStatus::Cancelled,
            _ = &mut deadline => InvocationStatus::Timeout,
        },
        other => other,
    };

    match status {
        InvocationStatus::Ok => {}
        InvocationStatus::Timeout => {
            terminate(&mut child).await;
            let err = BridgeError::BackendTimeout(limit);
            warn!(error = %err, lines, "backend stream timed out");
            send_final(&tx, err.sentinel()).await;
        }
        InvocationStatus::Cancelled => {
            info!(lines, "client disconnected; terminating backend");
            terminate(&mut child).await;
        }
        InvocationStatus::Error => terminate(&mut child).await,
    }
    drop(tx);

    if let Some(mut task) = stderr_task {
        // Descendants of the backend may hold the pipe open.
        if status != InvocationStatus::Ok {
            task.abort();
        } else {
            tokio::select! {
                res = &mut task => {
                    if let Ok(stderr) = res {
                        if !stderr.trim().is_empty() {
                            debug!(stderr = %stderr.trim(), "backend stderr");
                        }
                    }
                }
                _ = &mut deadline => {
                    task.abort();
                    debug!("backend stderr still open at deadline");
                }
            }
        }
    }

    status
}

async fn finish(child: &mut Child) {
    match child.wait().await {
        Ok(exit) if !exit.success() => warn!(status = %exit, "backend exited non-zero"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "waiting for backend failed"),
    }
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!(error = %e, "backend already gone");
    }
}

async fn send_final(tx: &mpsc::Sender<String>, text: String) {
    let _ = tokio::time::timeout(SENTINEL_GRACE, tx.send(text)).await;
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}
