//! One grep invocation.
//!
//! Output is parsed into [`SearchEvent::Results`], stderr is forwarded as-is and
//! exactly one [`SearchEvent::Exit`] is produced, either by the process ending or
//! by [`ProcessSearch::kill`] with [`Signal::Terminate`].

use super::parser::LineParser;
use crate::services::ports::search::{ExitReason, Query, SearchEvent, Signal};
use std::ffi::OsString;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

const READ_BUFFER_SIZE: usize = 8192;
const REAP_POLL_MIN: Duration = Duration::from_millis(2);
const REAP_POLL_MAX: Duration = Duration::from_millis(100);

static PROCESS_SEARCH_ID: AtomicU64 = AtomicU64::new(0);

fn next_process_search_id() -> u64 {
    PROCESS_SEARCH_ID.fetch_add(1, Ordering::Relaxed)
}

/// First writer wins; only the winner emits `Exit`.
#[derive(Default)]
struct ExitSlot {
    reason: OnceLock<ExitReason>,
}

impl ExitSlot {
    fn settle(&self, reason: ExitReason, tx: &UnboundedSender<SearchEvent>) -> bool {
        if self.reason.set(reason.clone()).is_err() {
            return false;
        }
        let _ = tx.send(SearchEvent::Exit(reason));
        true
    }

    fn get(&self) -> Option<&ExitReason> {
        self.reason.get()
    }
}

/// The child is reaped and signalled only under this lock, so a signal never
/// reaches a recycled pid. `None` once reaped or when spawning failed.
type ChildSlot = Arc<Mutex<Option<Child>>>;

fn lock_child(child: &Mutex<Option<Child>>) -> MutexGuard<'_, Option<Child>> {
    child.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ProcessSearch {
    id: u64,
    child: ChildSlot,
    exit: Arc<ExitSlot>,
    tx: UnboundedSender<SearchEvent>,
}

impl ProcessSearch {
    /// Spawns `program` for `query` on `runtime`.
    ///
    /// Spawn failures are reported through the returned channel as
    /// `Exit(Failed)`, never returned.
    ///
    /// # Panics
    ///
    /// Panics if the pattern is empty.
    pub fn spawn(
        runtime: &tokio::runtime::Handle,
        query: &Query,
        program: &str,
    ) -> (Self, UnboundedReceiver<SearchEvent>) {
        assert!(!query.pattern.is_empty(), "search pattern must not be empty");

        let (tx, rx) = mpsc::unbounded_channel();
        let id = next_process_search_id();
        let exit = Arc::new(ExitSlot::default());
        let child: ChildSlot = Arc::new(Mutex::new(None));

        let mut cmd = Command::new(program);
        cmd.args(grep_args(query))
            .current_dir(&query.root_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let spawned = {
            let _enter = runtime.enter();
            cmd.spawn()
        };

        match spawned {
            Ok(mut spawned) => {
                let stdout = spawned.stdout.take();
                let stderr = spawned.stderr.take();
                tracing::debug!(
                    search_id = id,
                    pid = ?spawned.id(),
                    root = %query.root_directory.display(),
                    "search process spawned"
                );
                *lock_child(&child) = Some(spawned);

                let stderr_task =
                    stderr.map(|stderr| runtime.spawn(stderr_loop(id, stderr, tx.clone())));
                runtime.spawn(supervise(
                    id,
                    child.clone(),
                    stdout,
                    stderr_task,
                    tx.clone(),
                    exit.clone(),
                ));
            }
            Err(e) => {
                tracing::warn!(search_id = id, program, error = %e, "spawn search process failed");
                exit.settle(
                    ExitReason::Failed(format!("spawn {} failed: {}", program, e)),
                    &tx,
                );
            }
        }

        (Self { id, child, exit, tx }, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Forwards `signal` to the process. `Terminate` settles the exit reason
    /// as [`ExitReason::Terminated`] right away, without waiting for the OS.
    ///
    /// # Panics
    ///
    /// Panics if the search has already exited.
    pub fn kill(&self, signal: Signal) {
        assert!(!self.exited(), "Not running");
        match signal {
            Signal::Terminate => {
                self.terminate();
            }
            other => {
                self.send_signal(other);
            }
        }
    }

    /// Sends TERM and settles `Terminated`. Returns `false` when the exit
    /// reason was already settled by someone else.
    pub(crate) fn terminate(&self) -> bool {
        if self.exited() {
            return false;
        }
        self.send_signal(Signal::Terminate);
        self.exit.settle(ExitReason::Terminated, &self.tx)
    }

    /// Delivers a raw signal while the child is still unreaped.
    pub(crate) fn send_signal(&self, signal: Signal) -> bool {
        let child = lock_child(&self.child);
        let Some(pid) = child.as_ref().and_then(Child::id) else {
            return false;
        };
        let delivered = deliver_signal(pid, signal);
        tracing::trace!(search_id = self.id, pid, ?signal, delivered, "signal search process");
        delivered
    }

    pub fn exited(&self) -> bool {
        self.exit.get().is_some()
    }

    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.exit.get().cloned()
    }
}

impl Drop for ProcessSearch {
    fn drop(&mut self) {
        if !self.exited() {
            self.terminate();
        }
    }
}

fn grep_args(query: &Query) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "--exclude-dir=.git",
        "--fixed-strings",
        "--recursive",
        "--color=never",
        "--with-filename",
        "--byte-offset",
        "--line-buffered",
        "--line-number",
        "--null",
    ]
    .iter()
    .map(OsString::from)
    .collect();

    if query.ignore_case {
        args.push("--ignore-case".into());
    }
    args.push("-e".into());
    args.push(query.pattern.clone().into());
    args
}

#[cfg(unix)]
fn deliver_signal(pid: u32, signal: Signal) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    unsafe { libc::kill(pid, signal.as_raw()) == 0 }
}

#[cfg(not(unix))]
fn deliver_signal(_pid: u32, _signal: Signal) -> bool {
    false
}

async fn supervise(
    id: u64,
    child: ChildSlot,
    stdout: Option<ChildStdout>,
    stderr_task: Option<JoinHandle<()>>,
    tx: UnboundedSender<SearchEvent>,
    exit: Arc<ExitSlot>,
) {
    if let Some(stdout) = stdout {
        stdout_loop(id, stdout, &tx).await;
    }

    let status = reap(&child).await;
    if let Some(task) = stderr_task {
        let _ = task.await;
    }

    let reason = match status {
        Ok(status) => exit_reason_from_status(status),
        Err(e) => ExitReason::Failed(format!("wait failed: {}", e)),
    };
    tracing::debug!(search_id = id, %reason, "search process exited");
    exit.settle(reason, &tx);
}

/// Polls `try_wait` under the child lock; stdout has closed by now, so the
/// child is normally gone on the first or second poll.
async fn reap(child: &Mutex<Option<Child>>) -> std::io::Result<ExitStatus> {
    let mut delay = REAP_POLL_MIN;
    loop {
        {
            let mut slot = lock_child(child);
            let Some(running) = slot.as_mut() else {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "child already reaped",
                ));
            };
            match running.try_wait() {
                Ok(Some(status)) => {
                    *slot = None;
                    return Ok(status);
                }
                Ok(None) => {}
                Err(e) => {
                    *slot = None;
                    return Err(e);
                }
            }
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(REAP_POLL_MAX);
    }
}

async fn stdout_loop<R: AsyncRead + Unpin>(id: u64, mut stdout: R, tx: &UnboundedSender<SearchEvent>) {
    let mut parser = LineParser::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let matches = parser.feed(&buf[..n]);
                if !matches.is_empty() {
                    let _ = tx.send(SearchEvent::Results(matches));
                }
            }
            Err(e) => {
                tracing::warn!(search_id = id, error = %e, "read search stdout failed");
                break;
            }
        }
    }

    let rest = parser.finish();
    if !rest.is_empty() {
        let _ = tx.send(SearchEvent::Results(rest));
    }
}

async fn stderr_loop<R: AsyncRead + Unpin>(id: u64, mut stderr: R, tx: UnboundedSender<SearchEvent>) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                tracing::debug!(search_id = id, stderr = %text.trim_end(), "search stderr");
                let _ = tx.send(SearchEvent::Stderr(text));
            }
        }
    }
}

fn exit_reason_from_status(status: ExitStatus) -> ExitReason {
    if let Some(code) = status.code() {
        return ExitReason::Completed(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitReason::Failed(format!("terminated by signal {}", signal));
        }
    }

    ExitReason::Failed(format!("process ended abnormally: {}", status))
}

#[cfg(test)]
#[path = "../../../../tests/unit/services/adapters/search/process.rs"]
mod tests;
