//! Child-process runner shared by the shell, interpreter, script and CIM
//! executors.
//!
//! The child is started in its own process group. On timeout or cancel the
//! whole group is killed and the child is reaped before returning, so no
//! descendant outlives the execution.

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use armada_core::{ErrorKind, ExecutionRequest, ExecutionResult};

use crate::cancel::CancelSignal;

/// How long to wait for pipe readers after the child is gone. Grandchildren
/// that inherited the pipes can keep them open past the child's exit.
const OUTPUT_GRACE: Duration = Duration::from_secs(2);

const TRUNCATED_MARKER: &str = "\n[output truncated]";

#[derive(Default)]
struct Capture {
    buf: Vec<u8>,
    truncated: bool,
}

impl Capture {
    fn render(&self) -> String {
        let mut s = String::from_utf8_lossy(&self.buf).into_owned();
        if self.truncated {
            s.push_str(TRUNCATED_MARKER);
        }
        s
    }
}

/// Reads a pipe to EOF, keeping at most `cap` bytes. Anything past the cap
/// is drained and discarded so the child never blocks on a full pipe.
fn spawn_reader<R>(mut pipe: R, cap: usize) -> (Arc<Mutex<Capture>>, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let capture = Arc::new(Mutex::new(Capture::default()));
    let sink = capture.clone();
    let handle = tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            let n = match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let Ok(mut c) = sink.lock() else { break };
            let room = cap.saturating_sub(c.buf.len());
            if n > room {
                c.truncated = true;
            }
            let keep = n.min(room);
            c.buf.extend_from_slice(&chunk[..keep]);
        }
    });
    (capture, handle)
}

async fn collect(capture: Option<(Arc<Mutex<Capture>>, JoinHandle<()>)>) -> String {
    let Some((capture, mut handle)) = capture else {
        return String::new();
    };
    if tokio::time::timeout(OUTPUT_GRACE, &mut handle).await.is_err() {
        handle.abort();
    }
    capture.lock().map(|c| c.render()).unwrap_or_default()
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Kill the child's process group, then the child itself.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            tracing::debug!(pid, error = %e, "killpg failed");
        }
    }
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "start_kill failed");
    }
}

/// Spawn `program args...` under the request's cwd/env and wait for it,
/// racing the request timeout and `cancel`.
pub(crate) async fn run_process<I, S>(
    program: impl AsRef<OsStr>,
    args: I,
    request: &ExecutionRequest,
    mut cancel: CancelSignal,
    max_output: usize,
) -> ExecutionResult
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let started = armada_core::now_ms();
    if cancel.is_cancelled() {
        return ExecutionResult::failed(ErrorKind::Cancelled, "cancelled before start", started);
    }

    let program = program.as_ref();
    let mut cmd = Command::new(program);
    cmd.args(args)
        .envs(&request.environment)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(if request.capture_stderr {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);
    if let Some(dir) = &request.working_directory {
        cmd.current_dir(dir);
    }
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            return ExecutionResult::failed(
                ErrorKind::SpawnFailed,
                format!("failed to start {}: {e}", program.to_string_lossy()),
                started,
            );
        }
    };

    let stdout = child.stdout.take().map(|p| spawn_reader(p, max_output));
    let stderr = child.stderr.take().map(|p| spawn_reader(p, max_output));

    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status),
        _ = tokio::time::sleep(request.timeout) => Outcome::TimedOut,
        _ = cancel.cancelled() => Outcome::Cancelled,
    };

    if matches!(outcome, Outcome::TimedOut | Outcome::Cancelled) {
        kill_tree(&mut child);
        if let Err(e) = child.wait().await {
            tracing::warn!(error = %e, "failed to reap killed child");
        }
    }

    let stdout = collect(stdout).await;
    let stderr = collect(stderr).await;

    match outcome {
        Outcome::TimedOut => {
            tracing::debug!(timeout_ms = request.timeout.as_millis() as u64, "process timed out");
            ExecutionResult::timed_out(request.timeout, stdout, stderr, started)
        }
        Outcome::Cancelled => {
            let mut r = ExecutionResult::failed(ErrorKind::Cancelled, "cancelled", started);
            r.stdout = stdout;
            r.stderr = stderr;
            r
        }
        Outcome::Exited(Err(e)) => {
            let mut r = ExecutionResult::failed(ErrorKind::Io, format!("wait failed: {e}"), started);
            r.stdout = stdout;
            r.stderr = stderr;
            r
        }
        Outcome::Exited(Ok(status)) => match status.code() {
            Some(code) => ExecutionResult::exited(code, stdout, stderr, started),
            None => {
                let mut r = ExecutionResult::failed(
                    ErrorKind::StepExecutionFailure,
                    describe_signal(status),
                    started,
                );
                r.stdout = stdout;
                r.stderr = stderr;
                r
            }
        },
    }
}

#[cfg(unix)]
fn describe_signal(status: ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(sig) => format!("terminated by signal {sig}"),
        None => "terminated without exit code".to_string(),
    }
}

#[cfg(not(unix))]
fn describe_signal(_status: ExitStatus) -> String {
    "terminated without exit code".to_string()
}
