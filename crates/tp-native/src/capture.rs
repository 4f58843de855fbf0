use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::NativeError;

const POLL_INTERVAL: Duration = Duration::from_millis(2);
/// How long the pipes may stay open after the direct child exits.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Bounds applied to every child process the harness spawns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureLimits {
    pub timeout_ms: u64,
    pub max_stdout_bytes: usize,
    pub max_stderr_bytes: usize,
}

impl CaptureLimits {
    /// Limits for the one-off build step: compilers are slow and chatty.
    #[must_use]
    pub fn for_build() -> Self {
        Self {
            timeout_ms: 600_000,
            max_stdout_bytes: 16 * 1024 * 1024,
            max_stderr_bytes: 16 * 1024 * 1024,
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_stdout_bytes: 64 * 1024 * 1024,
            max_stderr_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

struct StreamCapture {
    bytes: Vec<u8>,
    total_bytes: usize,
}

type ReaderResult = std::io::Result<StreamCapture>;

enum Exit {
    Exited(ExitStatus),
    Overflowed,
    TimedOut,
}

/// Spawn `command`, drain both pipes on reader threads and wait for exit.
///
/// On unix the child leads its own process group and the whole group is
/// killed on timeout or overflow, so helpers started by a wrapper script do
/// not outlive the run. Readers are never joined unbounded: a stream still
/// open after the deadline (a detached grandchild holding the pipe) turns
/// into a timeout and its reader thread is abandoned.
pub(crate) fn run_bounded(
    command: &mut Command,
    limits: &CaptureLimits,
    label: &str,
) -> Result<CapturedOutput, NativeError> {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let program = command.get_program().to_string_lossy().into_owned();
    let started_at = Instant::now();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| NativeError::Spawn { program, source })?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        terminate_and_reap(&mut child);
        return Err(NativeError::Io(std::io::Error::other(format!(
            "{label} output streams unavailable"
        ))));
    };

    let stdout_overflow = Arc::new(AtomicBool::new(false));
    let stderr_overflow = Arc::new(AtomicBool::new(false));
    let stdout_rx = spawn_reader(stdout, limits.max_stdout_bytes, Arc::clone(&stdout_overflow));
    let stderr_rx = spawn_reader(stderr, limits.max_stderr_bytes, Arc::clone(&stderr_overflow));

    let overflowed = || {
        stdout_overflow.load(Ordering::Relaxed) || stderr_overflow.load(Ordering::Relaxed)
    };
    let status = match wait_for_exit(&mut child, &overflowed, started_at, limits)? {
        Exit::Exited(status) => status,
        Exit::TimedOut => return Err(timeout_error(label, limits)),
        Exit::Overflowed => {
            let stdout_hit = stdout_overflow.load(Ordering::Relaxed);
            return Err(overflow_error(label, limits, stdout_hit));
        }
    };

    let deadline = (started_at + limits.timeout()).max(Instant::now()) + DRAIN_GRACE;
    let (Some(stdout), Some(stderr)) = (
        collect_reader(&stdout_rx, deadline, label, "stdout")?,
        collect_reader(&stderr_rx, deadline, label, "stderr")?,
    ) else {
        kill_group(&child);
        return Err(timeout_error(label, limits));
    };

    if stdout.total_bytes > limits.max_stdout_bytes {
        return Err(overflow_error(label, limits, true));
    }
    if stderr.total_bytes > limits.max_stderr_bytes {
        return Err(overflow_error(label, limits, false));
    }

    Ok(CapturedOutput {
        status,
        stdout: String::from_utf8_lossy(&stdout.bytes).into_owned(),
        stderr: String::from_utf8_lossy(&stderr.bytes).into_owned(),
    })
}

fn timeout_error(label: &str, limits: &CaptureLimits) -> NativeError {
    NativeError::Timeout {
        label: label.to_owned(),
        timeout_ms: limits.timeout_ms,
    }
}

fn overflow_error(label: &str, limits: &CaptureLimits, stdout: bool) -> NativeError {
    let (stream, max_bytes) = if stdout {
        ("stdout", limits.max_stdout_bytes)
    } else {
        ("stderr", limits.max_stderr_bytes)
    };
    NativeError::OutputOverflow {
        label: label.to_owned(),
        stream,
        max_bytes,
    }
}

fn wait_for_exit(
    child: &mut Child,
    overflowed: &dyn Fn() -> bool,
    started_at: Instant,
    limits: &CaptureLimits,
) -> Result<Exit, NativeError> {
    loop {
        if overflowed() {
            terminate_and_reap(child);
            return Ok(Exit::Overflowed);
        }

        match child.try_wait() {
            Ok(Some(status)) => return Ok(Exit::Exited(status)),
            Ok(None) => {}
            Err(error) => {
                terminate_and_reap(child);
                return Err(NativeError::Io(error));
            }
        }

        if started_at.elapsed() > limits.timeout() {
            terminate_and_reap(child);
            return Ok(Exit::TimedOut);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn terminate_and_reap(child: &mut Child) {
    // Group first, while the leader is unreaped and its pid cannot be reused.
    kill_group(child);
    let _ = child.kill();
    let _ = child.wait();
}

/// SIGKILL the child's process group via `kill(1)`; this crate forbids the
/// unsafe FFI a direct `killpg` would need.
#[cfg(unix)]
fn kill_group(child: &Child) {
    let _ = Command::new("kill")
        .args(["-KILL", "--", &format!("-{}", child.id())])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

fn spawn_reader<R: Read + Send + 'static>(
    reader: R,
    max_bytes: usize,
    overflow: Arc<AtomicBool>,
) -> mpsc::Receiver<ReaderResult> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(read_capped(reader, max_bytes, overflow.as_ref()));
    });
    rx
}

fn read_capped<R: Read>(mut reader: R, max_bytes: usize, overflow: &AtomicBool) -> ReaderResult {
    let mut bytes = Vec::with_capacity(max_bytes.min(8192));
    let mut total_bytes = 0usize;
    let mut chunk = [0_u8; 8192];

    loop {
        let read_len = reader.read(&mut chunk)?;
        if read_len == 0 {
            break;
        }
        total_bytes = total_bytes.saturating_add(read_len);
        if bytes.len() < max_bytes {
            let copy_len = read_len.min(max_bytes - bytes.len());
            bytes.extend_from_slice(&chunk[..copy_len]);
        }
        if total_bytes > max_bytes {
            overflow.store(true, Ordering::Relaxed);
        }
    }

    Ok(StreamCapture { bytes, total_bytes })
}

/// `Ok(None)` when the stream is still open at `deadline`.
fn collect_reader(
    rx: &mpsc::Receiver<ReaderResult>,
    deadline: Instant,
    label: &str,
    stream: &str,
) -> Result<Option<StreamCapture>, NativeError> {
    let wait = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(wait) {
        Ok(result) => result.map(Some).map_err(NativeError::Io),
        Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(NativeError::Io(
            std::io::Error::other(format!("{label} {stream} reader thread panicked")),
        )),
    }
}
