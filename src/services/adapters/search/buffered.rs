//! Pausable, throttled delivery on top of [`ProcessSearch`].
//!
//! Matches are queued and handed to the listener at most `batch_size` per tick.
//! `pause()` holds delivery (nothing is dropped) and stops the process; a paused
//! search that is not resumed within `pause_timeout` kills itself.

use super::process::ProcessSearch;
use super::Listener;
use crate::services::ports::config::SearchConfig;
use crate::services::ports::search::{ExitReason, Match, SearchEvent, Signal};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;
use tokio::time::Instant;

struct Core {
    process: ProcessSearch,
    /// Reason reported by the process, in channel order.
    process_exit: Option<ExitReason>,
    /// Set by `kill()`, wins over `process_exit`.
    kill_reason: Option<ExitReason>,
    buffer: VecDeque<Match>,
    emitting: bool,
    paused: bool,
    killed: bool,
    /// Only `Some` while paused.
    pause_deadline: Option<Instant>,
    exited: bool,
}

enum Step {
    Results(Vec<Match>),
    Exit(ExitReason),
    Idle,
}

impl Core {
    fn new(process: ProcessSearch) -> Self {
        Self {
            process,
            process_exit: None,
            kill_reason: None,
            buffer: VecDeque::new(),
            emitting: true,
            paused: false,
            killed: false,
            pause_deadline: None,
            exited: false,
        }
    }

    fn on_process_event(&mut self, event: SearchEvent) {
        match event {
            SearchEvent::Results(batch) => {
                if self.process_exit.is_none() && !self.killed {
                    self.buffer.extend(batch);
                }
            }
            SearchEvent::Exit(reason) => {
                if self.process_exit.is_none() {
                    self.process_exit = Some(reason);
                }
            }
            SearchEvent::Stderr(_) => {}
        }
    }

    fn next_step(&mut self, batch_size: usize) -> Step {
        if self.exited || self.paused {
            return Step::Idle;
        }

        if self.emitting && !self.buffer.is_empty() {
            let n = batch_size.min(self.buffer.len());
            return Step::Results(self.buffer.drain(..n).collect());
        }

        if !self.buffer.is_empty() {
            return Step::Idle;
        }

        match self.exit_reason() {
            Some(reason) => {
                self.exited = true;
                self.pause_deadline = None;
                Step::Exit(reason)
            }
            None => Step::Idle,
        }
    }

    fn exit_reason(&self) -> Option<ExitReason> {
        self.kill_reason
            .clone()
            .or_else(|| self.process_exit.clone())
    }

    fn process_running(&self) -> bool {
        self.process_exit.is_none() && !self.process.exited()
    }

    fn can_pause(&self) -> bool {
        !self.paused && !self.exited && self.emitting
    }

    fn can_resume(&self) -> bool {
        self.paused && !self.exited
    }

    fn can_kill(&self) -> bool {
        !self.exited && !self.killed
    }

    fn pause(&mut self, timeout: Duration) {
        self.emitting = false;
        self.paused = true;
        self.pause_deadline = Some(Instant::now() + timeout);
        if self.process_running() {
            self.process.send_signal(Signal::Stop);
        }
    }

    fn resume(&mut self) {
        self.emitting = true;
        self.paused = false;
        self.pause_deadline = None;
        if self.process_running() {
            self.process.send_signal(Signal::Continue);
        }
    }

    fn kill(&mut self) {
        let was_paused = self.paused;
        self.buffer.clear();
        self.emitting = false;
        self.paused = false;
        self.killed = true;
        self.pause_deadline = None;
        self.kill_reason = Some(ExitReason::Terminated);

        if self.process_exit.is_none() && self.process.terminate() && was_paused {
            self.process.send_signal(Signal::Continue);
        }
    }

    fn pause_expired(&self, now: Instant) -> bool {
        self.paused && self.pause_deadline.is_some_and(|deadline| deadline <= now)
    }
}

struct Shared {
    id: u64,
    core: Mutex<Core>,
    wake: Notify,
    batch_size: usize,
    pause_timeout: Duration,
}

/// Handle to a running buffered search. Cloning shares the same search.
#[derive(Clone)]
pub struct BufferedSearch {
    shared: Arc<Shared>,
}

impl BufferedSearch {
    /// Wraps `process`, whose events arrive on `events`, and starts delivering
    /// to `listener` on `runtime`.
    pub fn spawn(
        runtime: &tokio::runtime::Handle,
        process: ProcessSearch,
        events: UnboundedReceiver<SearchEvent>,
        config: &SearchConfig,
        listener: Listener<BufferedSearch>,
    ) -> Self {
        let search = Self {
            shared: Arc::new(Shared {
                id: process.id(),
                core: Mutex::new(Core::new(process)),
                wake: Notify::new(),
                batch_size: config.batch_size.max(1),
                pause_timeout: config.pause_timeout(),
            }),
        };

        runtime.spawn(pump(search.clone(), events, listener));
        search
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    fn core(&self) -> MutexGuard<'_, Core> {
        self.shared.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Holds delivery and stops the process until [`resume`](Self::resume).
    ///
    /// Called from inside the listener, no further batch is delivered. Called
    /// from another thread, at most one batch already taken off the buffer may
    /// still reach the listener after this returns. The same holds for
    /// [`kill`](Self::kill).
    ///
    /// # Panics
    ///
    /// Panics unless the search is running and not paused.
    pub fn pause(&self) {
        assert!(self.try_pause(), "pause: search is not running");
    }

    /// Like [`pause`](Self::pause) but returns `false` instead of panicking.
    pub fn try_pause(&self) -> bool {
        {
            let mut core = self.core();
            if !core.can_pause() {
                return false;
            }
            core.pause(self.shared.pause_timeout);
        }
        tracing::trace!(search_id = self.id(), "search paused");
        self.shared.wake.notify_one();
        true
    }

    /// # Panics
    ///
    /// Panics unless the search is paused.
    pub fn resume(&self) {
        assert!(self.try_resume(), "resume: search is not paused");
    }

    pub fn try_resume(&self) -> bool {
        {
            let mut core = self.core();
            if !core.can_resume() {
                return false;
            }
            core.resume();
        }
        tracing::trace!(search_id = self.id(), "search resumed");
        self.shared.wake.notify_one();
        true
    }

    /// Drops buffered matches and terminates the search. `Exit` follows
    /// asynchronously.
    ///
    /// # Panics
    ///
    /// Panics if the search was already killed or has exited.
    pub fn kill(&self) {
        assert!(self.try_kill(), "Not running");
    }

    pub fn try_kill(&self) -> bool {
        {
            let mut core = self.core();
            if !core.can_kill() {
                return false;
            }
            core.kill();
        }
        tracing::debug!(search_id = self.id(), "search killed");
        self.shared.wake.notify_one();
        true
    }

    pub fn paused(&self) -> bool {
        let core = self.core();
        core.paused && !core.exited
    }

    pub fn exited(&self) -> bool {
        self.core().exited
    }

    /// Available once exited.
    pub fn exit_reason(&self) -> Option<ExitReason> {
        let core = self.core();
        if core.exited {
            core.exit_reason()
        } else {
            None
        }
    }

    fn on_failsafe(&self) {
        {
            let mut core = self.core();
            if !core.pause_expired(Instant::now()) {
                return;
            }
            core.kill();
        }
        tracing::info!(
            search_id = self.id(),
            timeout_ms = self.shared.pause_timeout.as_millis() as u64,
            "paused search not resumed in time, killing"
        );
    }
}

async fn pump(
    search: BufferedSearch,
    mut events: UnboundedReceiver<SearchEvent>,
    mut listener: Listener<BufferedSearch>,
) {
    let batch_size = search.shared.batch_size;
    let mut events_open = true;

    loop {
        let (step, deadline) = {
            let mut core = search.core();
            let step = core.next_step(batch_size);
            (step, core.pause_deadline)
        };

        match step {
            Step::Results(batch) => {
                // Off the buffer: a pause or kill from another thread lands after it.
                listener(&search, SearchEvent::Results(batch));
                // One batch per tick.
                tokio::task::yield_now().await;
                continue;
            }
            Step::Exit(reason) => {
                tracing::debug!(search_id = search.id(), %reason, "buffered search exited");
                listener(&search, SearchEvent::Exit(reason));
                break;
            }
            Step::Idle => {}
        }

        let failsafe = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            event = events.recv(), if events_open => match event {
                Some(SearchEvent::Stderr(text)) => listener(&search, SearchEvent::Stderr(text)),
                Some(event) => search.core().on_process_event(event),
                None => events_open = false,
            },
            _ = search.shared.wake.notified() => {}
            _ = failsafe => search.on_failsafe(),
        }
    }
}

#[cfg(test)]
#[path = "../../../../tests/unit/services/adapters/search/buffered.rs"]
mod tests;
