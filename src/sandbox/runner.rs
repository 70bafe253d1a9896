use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::language::{resolve_interpreter, Language};
use super::workdir::WorkDir;
use crate::activity::ActivityLog;
use crate::config::RunnerConfig;
use crate::error::RunnerError;

/// How long stream draining may continue after the process has exited or
/// been killed. Grandchildren that inherited the pipes can keep them open.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Stand-in deadline for timeouts too large to add to an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `start + after`, clamped instead of overflowing
fn deadline_after(start: Instant, after: Duration) -> Instant {
    start
        .checked_add(after)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// Outcome of one sandboxed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// `exit_code == 0 && !timed_out`
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
    /// -1 when the process was terminated by a signal
    pub exit_code: i32,
    pub timed_out: bool,
    pub duration_ms: u64,
    /// Bytes dropped by the output limit
    #[serde(default)]
    pub stdout_truncated: usize,
    #[serde(default)]
    pub stderr_truncated: usize,
}

/// Runs source snippets in isolated working directories
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    config: RunnerConfig,
    root: PathBuf,
    activity: Option<ActivityLog>,
}

impl ProcessRunner {
    pub fn new(config: RunnerConfig) -> Self {
        let root = config
            .work_root
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        Self {
            config,
            root,
            activity: None,
        }
    }

    /// Record run start/finish in the activity log
    pub fn with_activity(mut self, activity: ActivityLog) -> Self {
        self.activity = Some(activity);
        self
    }

    /// Parent directory for per-run working directories
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn default_timeout_secs(&self) -> u64 {
        self.config.default_timeout_secs
    }

    fn record(&self, message: String) {
        if let Some(activity) = &self.activity {
            activity.record(message);
        }
    }

    /// Resolve the interpreter for a language, honoring configured overrides
    pub fn interpreter_for(&self, language: Language) -> Result<PathBuf, RunnerError> {
        let program = self
            .config
            .interpreters
            .get(&language)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(language.spec().interpreter));

        resolve_interpreter(&program).ok_or(RunnerError::RuntimeUnavailable {
            language,
            path: program,
        })
    }

    /// Run with the configured default timeout
    pub async fn run_default(
        &self,
        source: &str,
        language: Language,
    ) -> Result<ExecutionResult, RunnerError> {
        self.run(source, language, self.config.default_timeout_secs)
            .await
    }

    /// Run one snippet.
    ///
    /// Only environment failures are errors. A program that fails or times
    /// out is reported through the returned [`ExecutionResult`].
    #[instrument(skip(self, source), fields(root = %self.root.display()))]
    pub async fn run(
        &self,
        source: &str,
        language: Language,
        timeout_secs: u64,
    ) -> Result<ExecutionResult, RunnerError> {
        let interpreter = self.interpreter_for(language)?;

        // Removed on drop, whichever way this function exits
        let workdir = WorkDir::create(&self.root)?;
        let source_path = workdir
            .write_source(&language.source_file_name(), source)
            .await?;

        self.record(format!(
            "Running {} snippet ({} bytes, timeout {}s)",
            language,
            source.len(),
            timeout_secs
        ));

        let result = self
            .execute(
                language,
                &interpreter,
                &source_path,
                workdir.path(),
                Duration::from_secs(timeout_secs),
            )
            .await;
        drop(workdir);

        match &result {
            Ok(r) if r.timed_out => {
                self.record(format!("{} snippet timed out after {}s", language, timeout_secs))
            }
            Ok(r) => self.record(format!(
                "{} snippet exited with code {} in {}ms",
                language, r.exit_code, r.duration_ms
            )),
            Err(e) => self.record(format!("{} snippet could not run: {}", language, e)),
        }
        result
    }

    async fn execute(
        &self,
        language: Language,
        interpreter: &Path,
        source_path: &Path,
        dir: &Path,
        timeout: Duration,
    ) -> Result<ExecutionResult, RunnerError> {
        let started = Instant::now();
        let deadline = deadline_after(started, timeout);

        let mut command = Command::new(interpreter);
        command
            .args(language.spec().args)
            .arg(source_path)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Leader of a fresh group so the whole tree can be killed at once
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                RunnerError::RuntimeUnavailable {
                    language,
                    path: interpreter.to_path_buf(),
                }
            } else {
                RunnerError::Spawn {
                    program: interpreter.display().to_string(),
                    source,
                }
            }
        })?;
        // Also killed on drop, covering a cancelled run
        let group = ProcessGroup::new(child.id());
        debug!(pid = ?child.id(), "spawned child process");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.config.output_limit_bytes;
        let mut stdout_capture = Capture::new(limit);
        let mut stderr_capture = Capture::new(limit);

        let wait = async {
            let outcome = match tokio::time::timeout_at(deadline, child.wait()).await {
                Ok(status) => status.map(|s| (s, false)),
                Err(_) => {
                    warn!(timeout_secs = timeout.as_secs(), "process timed out, killing");
                    if !group.kill() {
                        if let Err(e) = child.start_kill() {
                            return Err(e);
                        }
                    }
                    child.wait().await.map(|s| (s, true))
                }
            };
            // Background processes left by the snippet would keep the pipes open
            group.kill();
            outcome
        };

        let drain = async {
            let streams = async {
                tokio::join!(stdout_capture.fill(stdout), stderr_capture.fill(stderr))
            };
            match tokio::time::timeout_at(deadline_after(deadline, DRAIN_GRACE), streams).await {
                Ok((out, err)) => {
                    if let Err(e) = out.and(err) {
                        warn!(err = %e, "error while reading process output");
                    }
                }
                Err(_) => warn!("output streams still open after process exit, abandoning drain"),
            }
        };

        let (status, ()) = tokio::join!(wait, drain);
        let (status, timed_out) = status.map_err(RunnerError::Wait)?;

        let exit_code = status.code().unwrap_or(-1);
        let (stdout, stdout_truncated) = stdout_capture.into_output();
        let (stderr, stderr_truncated) = stderr_capture.into_output();
        if stdout_truncated > 0 || stderr_truncated > 0 {
            warn!(stdout_truncated, stderr_truncated, "output truncated");
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(exit_code, timed_out, duration_ms, "process finished");

        Ok(ExecutionResult {
            succeeded: exit_code == 0 && !timed_out,
            stdout,
            stderr,
            exit_code,
            timed_out,
            duration_ms,
            stdout_truncated,
            stderr_truncated,
        })
    }
}

/// Process group led by a spawned child
struct ProcessGroup {
    #[cfg_attr(not(unix), allow(dead_code))]
    leader: Option<u32>,
}

impl ProcessGroup {
    fn new(leader: Option<u32>) -> Self {
        Self { leader }
    }

    /// SIGKILL every process in the group. Returns false when nothing was signalled.
    #[cfg(unix)]
    fn kill(&self) -> bool {
        let Some(pgid) = self.leader.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
            return false;
        };
        // SAFETY: killpg has no memory effects; the group id comes from our own child
        if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
            return true;
        }
        let err = std::io::Error::last_os_error();
        // ESRCH: group already gone. EPERM: only zombies left (macOS)
        if !matches!(err.raw_os_error(), Some(libc::ESRCH) | Some(libc::EPERM)) {
            warn!(pgid, err = %err, "failed to kill process group");
        }
        false
    }

    #[cfg(not(unix))]
    fn kill(&self) -> bool {
        false
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Output buffer that keeps at most `limit` bytes and counts the rest
struct Capture {
    bytes: Vec<u8>,
    dropped: usize,
    limit: Option<usize>,
}

impl Capture {
    fn new(limit: Option<usize>) -> Self {
        Self {
            bytes: Vec::new(),
            dropped: 0,
            limit,
        }
    }

    /// Read until EOF. Bytes past the limit are discarded but still drained.
    async fn fill<R: AsyncRead + Unpin>(&mut self, reader: Option<R>) -> std::io::Result<()> {
        let Some(mut reader) = reader else {
            return Ok(());
        };
        let mut chunk = [0u8; 8192];
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            self.push(&chunk[..n]);
        }
    }

    fn push(&mut self, data: &[u8]) {
        let keep = match self.limit {
            Some(limit) => limit.saturating_sub(self.bytes.len()).min(data.len()),
            None => data.len(),
        };
        self.bytes.extend_from_slice(&data[..keep]);
        self.dropped += data.len() - keep;
    }

    fn into_output(self) -> (String, usize) {
        (String::from_utf8_lossy(&self.bytes).into_owned(), self.dropped)
    }
}
