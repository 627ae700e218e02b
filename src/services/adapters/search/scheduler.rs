//! Bounded concurrency for search tasks.
//!
//! At most `max_concurrent` tasks have a live process. The pending queue is
//! LIFO: the most recently submitted query is started first, since callers
//! supersede queries per keystroke and want the freshest one answered.

use super::deferred::DeferredSearch;
use super::Listener;
use crate::services::ports::config::SearchConfig;
use crate::services::ports::search::{Query, SearchEvent};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

struct SchedulerState {
    pending: Vec<DeferredSearch>,
    running: FxHashMap<u64, DeferredSearch>,
    max_concurrent: usize,
}

impl SchedulerState {
    fn remove(&mut self, id: u64) {
        self.pending.retain(|task| task.id() != id);
        self.running.remove(&id);
    }

    fn promote(&mut self) {
        while self.running.len() < self.max_concurrent {
            let Some(task) = self.pending.pop() else {
                break;
            };
            if task.exited() {
                continue;
            }
            task.start();
            tracing::debug!(
                search_id = task.id(),
                running = self.running.len() + 1,
                pending = self.pending.len(),
                "search task promoted"
            );
            self.running.insert(task.id(), task);
        }
    }
}

#[derive(Clone)]
pub struct SearchScheduler {
    state: Arc<Mutex<SchedulerState>>,
    runtime: tokio::runtime::Handle,
    config: SearchConfig,
}

impl SearchScheduler {
    pub fn new(runtime: tokio::runtime::Handle) -> Self {
        Self::with_config(runtime, SearchConfig::default())
    }

    pub fn with_config(runtime: tokio::runtime::Handle, config: SearchConfig) -> Self {
        let config = config.validated();
        Self {
            state: Arc::new(Mutex::new(SchedulerState {
                pending: Vec::new(),
                running: FxHashMap::default(),
                max_concurrent: config.max_concurrent,
            })),
            runtime,
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        lock_state(&self.state)
    }

    /// Queues `query` and starts it as soon as a slot is free. `listener`
    /// receives every event of the task; `Exit` comes exactly once.
    pub fn search<F>(&self, query: Query, mut listener: F) -> DeferredSearch
    where
        F: FnMut(&DeferredSearch, SearchEvent) + Send + 'static,
    {
        let state = Arc::downgrade(&self.state);
        let mut exited = false;

        let tracked: Listener<DeferredSearch> =
            Box::new(move |task: &DeferredSearch, event: SearchEvent| {
                if let SearchEvent::Exit(reason) = &event {
                    assert!(!exited, "search task exited twice");
                    exited = true;
                    tracing::debug!(search_id = task.id(), %reason, "search task finished");
                    on_task_exit(&state, task.id());
                }
                listener(task, event);
            });

        let task = DeferredSearch::new(
            self.runtime.clone(),
            query,
            self.config.clone(),
            tracked,
        );

        let mut state = self.lock();
        state.pending.push(task.clone());
        state.promote();
        task
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn running_count(&self) -> usize {
        self.lock().running.len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.config.max_concurrent
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }
}

fn lock_state(state: &Mutex<SchedulerState>) -> MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn on_task_exit(state: &Weak<Mutex<SchedulerState>>, id: u64) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let mut state = lock_state(&state);
    state.remove(id);
    state.promote();
}

#[cfg(test)]
#[path = "../../../../tests/unit/services/adapters/search/scheduler.rs"]
mod tests;
