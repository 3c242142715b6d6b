use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::process::{ProcessCommand, ProcessError};
use crate::types::RunOutcome;

/// How long to keep draining pipes after the child is gone.
///
/// Pipes normally close together with the process group; a straggler that
/// escaped the group must not hold the caller hostage.
const IO_CAPTURE_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8192;

#[derive(Debug, Default)]
struct Captured {
    data: Vec<u8>,
    truncated: bool,
}

/// Background reader for one output stream.
///
/// The buffer is shared so that whatever was read stays available even if
/// the reader has to be abandoned.
struct StreamCapture {
    buffer: Arc<Mutex<Captured>>,
    task: JoinHandle<()>,
}

impl StreamCapture {
    fn spawn<R>(reader: R, max_bytes: usize, stream: &'static str) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Captured::default()));
        let task = tokio::spawn(read_bounded(reader, max_bytes, stream, Arc::clone(&buffer)));
        Self { buffer, task }
    }

    async fn finish(self, stream: &'static str) -> Captured {
        let mut task = self.task;
        if tokio::time::timeout(IO_CAPTURE_GRACE, &mut task).await.is_err() {
            warn!(stream, "output still open after process exit, abandoning reader");
            task.abort();
        }
        let mut guard = self
            .buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *guard)
    }
}

/// Read a stream into the shared buffer, discarding anything past `max_bytes`
async fn read_bounded<R>(
    mut reader: R,
    max_bytes: usize,
    stream: &'static str,
    buffer: Arc<Mutex<Captured>>,
) where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                warn!(stream, error = %err, "output capture failed");
                break;
            }
        };

        let mut captured = buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let remaining = max_bytes.saturating_sub(captured.data.len());
        if remaining < n && !captured.truncated {
            warn!(stream, max_bytes, "output exceeded limit, truncating");
            captured.truncated = true;
        }
        let take = n.min(remaining);
        captured.data.extend_from_slice(&chunk[..take]);
    }
}

/// Run a command to completion or timeout
///
/// Blocks the calling task until the child exits or is killed. A non-zero
/// exit code is returned as a normal [`RunOutcome`].
#[instrument(skip(command), fields(command = %command.display()))]
pub async fn run(command: ProcessCommand) -> Result<RunOutcome, ProcessError> {
    let program = command
        .program()
        .ok_or(ProcessError::EmptyCommand)?
        .to_owned();

    let mut cmd = Command::new(&program);
    cmd.args(command.args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = command.get_working_dir() {
        cmd.current_dir(dir);
    }
    if command.is_env_clear() {
        cmd.env_clear();
    }
    cmd.envs(command.get_env());

    #[cfg(unix)]
    cmd.process_group(0);

    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ProcessError::NotFound {
                program: program.clone(),
                source,
            }
        } else {
            ProcessError::Spawn {
                program: program.clone(),
                source,
            }
        }
    })?;

    // The child leads its own group, so its pid is the group id. Taken now
    // because the id is no longer available once the child is reaped.
    let pgid = child.id();
    debug!(pid = ?pgid, "spawned child process");

    let max_output = command.get_max_output_bytes();
    let stdout = child
        .stdout
        .take()
        .map(|s| StreamCapture::spawn(s, max_output, "stdout"));
    let stderr = child
        .stderr
        .take()
        .map(|s| StreamCapture::spawn(s, max_output, "stderr"));

    let timeout = command.get_timeout();
    #[cfg(unix)]
    let waited = tokio::time::timeout(timeout, exited(pgid)).await;
    #[cfg(not(unix))]
    let waited = tokio::time::timeout(timeout, async { child.wait().await.map(drop) }).await;
    let elapsed = started.elapsed();

    let status = match waited {
        Ok(Ok(())) => {
            // The zombie still holds the group id, so nothing else can
            // have taken it. Clear out whatever the runnable left behind.
            if let Some(pgid) = pgid {
                kill_group(pgid);
            }
            Some(child.wait().await?)
        }
        Ok(Err(err)) => {
            kill_tree(&mut child, pgid).await;
            return Err(ProcessError::Io(err));
        }
        Err(_) => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "process timed out; killing"
            );
            kill_tree(&mut child, pgid).await;
            None
        }
    };

    let stdout = collect(stdout, "stdout").await;
    let stderr = collect(stderr, "stderr").await;

    let Some(status) = status else {
        return Err(ProcessError::Timeout {
            timeout,
            elapsed,
            stdout: stdout.data,
            stderr: stderr.data,
            stdout_truncated: stdout.truncated,
            stderr_truncated: stderr.truncated,
        });
    };

    let outcome = RunOutcome {
        exit_code: status.code(),
        signal: exit_signal(&status),
        stdout: stdout.data,
        stderr: stderr.data,
        stdout_truncated: stdout.truncated,
        stderr_truncated: stderr.truncated,
        duration: elapsed,
    };

    debug!(
        exit_code = ?outcome.exit_code,
        signal = ?outcome.signal,
        stdout_len = outcome.stdout.len(),
        stderr_len = outcome.stderr.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "process finished"
    );

    Ok(outcome)
}

/// Check whether a program runs and exits successfully
///
/// Used for interpreter health probes; any error counts as unavailable.
pub async fn probe(command: &[String], timeout: Duration) -> bool {
    if command.is_empty() {
        return false;
    }
    let command = ProcessCommand::new(command.iter().cloned())
        .timeout(timeout)
        .max_output_bytes(64 * 1024);
    match run(command).await {
        Ok(outcome) => outcome.is_success(),
        Err(err) => {
            debug!(error = %err, "probe failed");
            false
        }
    }
}

async fn collect(capture: Option<StreamCapture>, stream: &'static str) -> Captured {
    match capture {
        Some(capture) => capture.finish(stream).await,
        None => Captured::default(),
    }
}

/// Wait for the child to exit, leaving it unreaped
#[cfg(unix)]
async fn exited(pid: Option<u32>) -> std::io::Result<()> {
    let Some(pid) = pid else {
        return Ok(());
    };
    let pid = libc::id_t::from(pid);
    tokio::task::spawn_blocking(move || {
        loop {
            // SAFETY: siginfo_t is plain data that waitid fills in; an
            // all-zero value is a valid initial state.
            let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
            // SAFETY: `info` is a valid, exclusively borrowed siginfo_t.
            // WNOWAIT leaves the child waitable for `Child::wait`.
            let rc = unsafe {
                libc::waitid(
                    libc::P_PID,
                    pid,
                    &mut info,
                    libc::WEXITED | libc::WNOWAIT,
                )
            };
            if rc == 0 {
                return Ok(());
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    })
    .await
    .map_err(std::io::Error::other)?
}

/// Kill the child's process group and the child itself, then reap it
async fn kill_tree(child: &mut Child, pgid: Option<u32>) {
    if let Some(pgid) = pgid {
        kill_group(pgid);
    }
    if let Err(err) = child.start_kill() {
        // Already exited and reaped
        debug!(error = %err, "child kill skipped");
    }
    if let Err(err) = child.wait().await {
        warn!(error = %err, "failed to reap child process");
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: kill(2) with a negative pid signals every process in the group
    // led by our child; it has no memory-safety preconditions.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
