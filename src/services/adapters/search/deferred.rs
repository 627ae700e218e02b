//! A search that may be queued, and even cancelled, before any process exists.

use super::buffered::BufferedSearch;
use super::process::ProcessSearch;
use super::Listener;
use crate::services::ports::config::SearchConfig;
use crate::services::ports::search::{ExitReason, Query, SearchEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static TASK_ID: AtomicU64 = AtomicU64::new(0);

fn next_task_id() -> u64 {
    TASK_ID.fetch_add(1, Ordering::Relaxed)
}

enum TaskState {
    NotStarted,
    Started(BufferedSearch),
    /// Killed before start; no process was ever spawned.
    Cancelled,
}

struct TaskInner {
    id: u64,
    query: Query,
    config: SearchConfig,
    runtime: tokio::runtime::Handle,
    state: Mutex<TaskState>,
    /// Taken on start or on cancellation.
    listener: Mutex<Option<Listener<DeferredSearch>>>,
}

#[derive(Clone)]
pub struct DeferredSearch {
    inner: Arc<TaskInner>,
}

impl DeferredSearch {
    pub fn new(
        runtime: tokio::runtime::Handle,
        query: Query,
        config: SearchConfig,
        listener: Listener<DeferredSearch>,
    ) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: next_task_id(),
                query,
                config,
                runtime,
                state: Mutex::new(TaskState::NotStarted),
                listener: Mutex::new(Some(listener)),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn query(&self) -> &Query {
        &self.inner.query
    }

    fn state(&self) -> MutexGuard<'_, TaskState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_listener(&self) -> Option<Listener<DeferredSearch>> {
        self.inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn buffered(&self) -> Option<BufferedSearch> {
        match &*self.state() {
            TaskState::Started(search) => Some(search.clone()),
            _ => None,
        }
    }

    /// Spawns the process. Does nothing if the task was killed before.
    ///
    /// # Panics
    ///
    /// Panics if called twice.
    pub fn start(&self) {
        let mut state = self.state();
        match &*state {
            TaskState::Cancelled => return,
            TaskState::Started(_) => panic!("Search already started"),
            TaskState::NotStarted => {}
        }

        let Some(mut listener) = self.take_listener() else {
            return;
        };

        let (process, events) = ProcessSearch::spawn(
            &self.inner.runtime,
            &self.inner.query,
            &self.inner.config.program,
        );

        let task = self.clone();
        let forward: Listener<BufferedSearch> =
            Box::new(move |_: &BufferedSearch, event: SearchEvent| listener(&task, event));

        let search = BufferedSearch::spawn(
            &self.inner.runtime,
            process,
            events,
            &self.inner.config,
            forward,
        );

        tracing::debug!(
            search_id = self.id(),
            pattern = %self.inner.query.pattern,
            "search task started"
        );
        *state = TaskState::Started(search);
    }

    /// Before start, exits synchronously with [`ExitReason::Terminated`];
    /// afterwards forwards to the running search.
    ///
    /// # Panics
    ///
    /// Panics if the task was already killed or has exited.
    pub fn kill(&self) {
        assert!(self.try_kill(), "Not running");
    }

    pub fn try_kill(&self) -> bool {
        let mut state = self.state();
        if matches!(*state, TaskState::NotStarted) {
            *state = TaskState::Cancelled;
            drop(state);

            tracing::debug!(search_id = self.id(), "search task cancelled before start");
            if let Some(mut listener) = self.take_listener() {
                listener(self, SearchEvent::Exit(ExitReason::Terminated));
            }
            return true;
        }

        let search = match &*state {
            TaskState::Started(search) => search.clone(),
            _ => return false,
        };
        drop(state);
        search.try_kill()
    }

    /// # Panics
    ///
    /// Panics unless started, running and not paused.
    pub fn pause(&self) {
        match self.buffered() {
            Some(search) => search.pause(),
            None => panic!("Search not started"),
        }
    }

    pub fn try_pause(&self) -> bool {
        self.buffered().is_some_and(|search| search.try_pause())
    }

    /// # Panics
    ///
    /// Panics unless started and paused.
    pub fn resume(&self) {
        match self.buffered() {
            Some(search) => search.resume(),
            None => panic!("Search not started"),
        }
    }

    pub fn try_resume(&self) -> bool {
        self.buffered().is_some_and(|search| search.try_resume())
    }

    pub fn started(&self) -> bool {
        matches!(&*self.state(), TaskState::Started(_))
    }

    pub fn paused(&self) -> bool {
        self.buffered().is_some_and(|search| search.paused())
    }

    pub fn exited(&self) -> bool {
        match &*self.state() {
            TaskState::NotStarted => false,
            TaskState::Started(search) => search.exited(),
            TaskState::Cancelled => true,
        }
    }

    pub fn exit_reason(&self) -> Option<ExitReason> {
        match &*self.state() {
            TaskState::NotStarted => None,
            TaskState::Started(search) => search.exit_reason(),
            TaskState::Cancelled => Some(ExitReason::Terminated),
        }
    }
}

impl std::fmt::Debug for DeferredSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredSearch")
            .field("id", &self.id())
            .field("query", &self.inner.query)
            .field("started", &self.started())
            .field("exited", &self.exited())
            .finish()
    }
}

#[cfg(test)]
#[path = "../../../../tests/unit/services/adapters/search/deferred.rs"]
mod tests;
