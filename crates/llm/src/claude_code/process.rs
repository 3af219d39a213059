//! CLI Process Management
//!
//! Spawns the CLI with piped stdio and reads its stdout as lines under an
//! idle timeout and an overall deadline.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{GatewayError, GatewayResult};

/// Configuration for spawning one CLI run.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnConfig {
    pub program: String,
    /// Arguments placed before the gateway's own flags, e.g. a package name
    /// when `program` is a launcher.
    pub program_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub extra_args: Vec<String>,
    pub resume_session_id: Option<String>,
    pub model: Option<String>,
    /// Serialized JSON schema for structured output.
    pub json_schema: Option<String>,
}

impl SpawnConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            program_args: Vec::new(),
            working_dir: None,
            extra_args: Vec::new(),
            resume_session_id: None,
            model: None,
            json_schema: None,
        }
    }

    pub fn with_resume(mut self, session_id: impl Into<String>) -> Self {
        self.resume_session_id = Some(session_id.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn with_program_args(mut self, args: Vec<String>) -> Self {
        self.program_args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_json_schema(mut self, schema: impl Into<String>) -> Self {
        self.json_schema = Some(schema.into());
        self
    }

    /// Full argument list, program excluded.
    pub fn args(&self) -> Vec<String> {
        let mut args = self.program_args.clone();
        args.extend(
            [
                "-p",
                "--output-format",
                "stream-json",
                "--verbose",
                "--include-partial-messages",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(session_id) = &self.resume_session_id {
            args.push("--resume".to_string());
            args.push(session_id.clone());
        }
        if let Some(schema) = &self.json_schema {
            args.push("--json-schema".to_string());
            args.push(schema.clone());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Handle to a running CLI process. Dropping it kills the process and
/// everything it started.
pub struct CliProcess {
    child: Child,
    pid: u32,
}

impl CliProcess {
    pub fn spawn(config: &SpawnConfig) -> GatewayResult<Self> {
        let mut cmd = Command::new(&config.program);
        cmd.args(config.args());
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so launcher children die with the CLI.
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| {
            let stderr = if e.kind() == std::io::ErrorKind::NotFound {
                format!("{} not found on PATH", config.program)
            } else {
                format!("failed to spawn {}: {}", config.program, e)
            };
            GatewayError::ProcessFailure {
                exit_code: None,
                stderr,
            }
        })?;
        let pid = child.id().unwrap_or(0);
        tracing::debug!("Spawned {} (pid {})", config.program, pid);
        Ok(Self { child, pid })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Wait for exit, up to `limit`. `Ok(None)` means the limit elapsed.
    pub async fn wait_with_limit(&mut self, limit: Option<Duration>) -> GatewayResult<Option<i32>> {
        let status = match limit {
            Some(limit) => match tokio::time::timeout(limit, self.child.wait()).await {
                Ok(status) => status,
                Err(_) => return Ok(None),
            },
            None => self.child.wait().await,
        };
        let status = status.map_err(|e| GatewayError::ProcessFailure {
            exit_code: None,
            stderr: format!("failed to wait for process: {}", e),
        })?;
        // Killed by a signal: no code, report as -1.
        Ok(Some(status.code().unwrap_or(-1)))
    }

    pub async fn kill(&mut self) {
        self.kill_group();
        if let Err(e) = self.child.kill().await {
            tracing::debug!("Failed to kill pid {}: {}", self.pid, e);
        }
    }

    /// SIGKILL the process group led by the CLI.
    pub fn kill_group(&self) {
        #[cfg(unix)]
        {
            if self.pid == 0 {
                return;
            }
            // SAFETY: killpg only sends a signal; the group id is our child's pid.
            let rc = unsafe { libc::killpg(self.pid as libc::pid_t, libc::SIGKILL) };
            if rc != 0 {
                tracing::trace!(
                    "killpg({}) failed: {}",
                    self.pid,
                    std::io::Error::last_os_error()
                );
            }
        }
    }
}

impl Drop for CliProcess {
    fn drop(&mut self) {
        self.kill_group();
        let _ = self.child.start_kill();
    }
}

/// Write the prompt and close stdin so the CLI sees EOF.
pub(crate) fn write_prompt(mut stdin: ChildStdin, prompt: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
            tracing::debug!("Failed to write prompt to CLI stdin: {}", e);
        }
        drop(stdin);
    })
}

/// Time allowed for stderr to reach EOF once the process is gone.
pub(crate) const STDERR_GRACE: Duration = Duration::from_secs(1);

/// Collects everything the process writes to stderr.
pub(crate) struct StderrCollector {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl StderrCollector {
    pub(crate) fn spawn<R>(mut stderr: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = buffer.clone();
        let task = tokio::spawn(async move {
            let mut chunk = [0u8; 4096];
            loop {
                match stderr.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        tracing::debug!("Failed to read CLI stderr: {}", e);
                        break;
                    }
                }
            }
        });
        Self { buffer, task }
    }

    /// Wait up to `grace` for EOF, then return what was read so far.
    pub(crate) async fn finish(mut self, grace: Duration) -> String {
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            tracing::debug!("CLI stderr still open after {:?}, abandoning it", grace);
            self.task.abort();
        }
        let bytes = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Why reading stopped early.
#[derive(Debug)]
pub(crate) enum ReadFailure {
    /// No output for the idle timeout.
    Idle(Duration),
    /// The overall deadline passed.
    Deadline,
    Io(std::io::Error),
}

impl ReadFailure {
    pub(crate) fn describe(&self) -> String {
        match self {
            ReadFailure::Idle(d) => format!("no output for {:?}", d),
            ReadFailure::Deadline => "timed out".to_string(),
            ReadFailure::Io(e) => format!("failed to read output: {}", e),
        }
    }
}

/// Splits a byte stream into lines, enforcing both timeouts on every read.
pub(crate) struct LineReader<R> {
    inner: R,
    buffer: Vec<u8>,
    idle_timeout: Option<Duration>,
    deadline: Option<Instant>,
    finished: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub(crate) fn new(inner: R, idle_timeout: Option<Duration>, deadline: Option<Instant>) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            idle_timeout,
            deadline,
            finished: false,
        }
    }

    /// Next batch of complete lines. At EOF an unterminated tail is returned
    /// once as a final line, then `Ok(None)`.
    pub(crate) async fn next_lines(&mut self) -> Result<Option<Vec<String>>, ReadFailure> {
        if self.finished {
            return Ok(None);
        }
        let mut chunk = [0u8; 8192];
        loop {
            let n = match self.budget() {
                Some(budget) => {
                    match tokio::time::timeout(budget, self.inner.read(&mut chunk)).await {
                        Ok(read) => read.map_err(ReadFailure::Io)?,
                        Err(_) => return Err(self.timeout_kind()),
                    }
                }
                None => self.inner.read(&mut chunk).await.map_err(ReadFailure::Io)?,
            };

            if n == 0 {
                self.finished = true;
                let tail = std::mem::take(&mut self.buffer);
                let tail = String::from_utf8_lossy(&tail).trim().to_string();
                return Ok(if tail.is_empty() { None } else { Some(vec![tail]) });
            }

            self.buffer.extend_from_slice(&chunk[..n]);
            let mut lines = Vec::new();
            while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                lines.push(String::from_utf8_lossy(&line).trim_end().to_string());
            }
            if !lines.is_empty() {
                return Ok(Some(lines));
            }
        }
    }

    fn budget(&self) -> Option<Duration> {
        let remaining = self
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()));
        match (self.idle_timeout, remaining) {
            (Some(idle), Some(rem)) => Some(idle.min(rem)),
            (Some(idle), None) => Some(idle),
            (None, rem) => rem,
        }
    }

    fn timeout_kind(&self) -> ReadFailure {
        match (self.deadline, self.idle_timeout) {
            (Some(deadline), _) if Instant::now() >= deadline => ReadFailure::Deadline,
            (_, Some(idle)) => ReadFailure::Idle(idle),
            _ => ReadFailure::Deadline,
        }
    }
}
