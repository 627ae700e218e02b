//! One client's view of the scheduler: a single live query, one batch in
//! flight at a time.

use super::deferred::DeferredSearch;
use super::scheduler::SearchScheduler;
use crate::services::ports::search::{ExitReason, Match, Query, SearchEvent};
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionMessage {
    Results { query: String, results: Vec<Match> },
    End { query: String, reason: ExitReason },
}

pub struct SearchSession {
    scheduler: SearchScheduler,
    tx: Sender<SessionMessage>,
    current: Mutex<Option<DeferredSearch>>,
}

impl SearchSession {
    pub fn new(scheduler: SearchScheduler, tx: Sender<SessionMessage>) -> Self {
        Self {
            scheduler,
            tx,
            current: Mutex::new(None),
        }
    }

    fn current(&self) -> MutexGuard<'_, Option<DeferredSearch>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the current query. An empty pattern is ignored and `false`
    /// returned.
    pub fn search(&self, root: impl Into<PathBuf>, pattern: &str, ignore_case: bool) -> bool {
        if pattern.is_empty() {
            return false;
        }

        let mut current = self.current();
        if let Some(previous) = current.take() {
            previous.try_kill();
        }

        let query = Query::new(root, pattern).ignore_case(ignore_case);
        let tx = self.tx.clone();
        let label = pattern.to_string();

        let task = self
            .scheduler
            .search(query, move |task: &DeferredSearch, event: SearchEvent| match event {
                SearchEvent::Results(results) => {
                    if results.is_empty() {
                        return;
                    }
                    // Paused before the consumer can see the batch and ask for more.
                    task.try_pause();
                    let _ = tx.send(SessionMessage::Results {
                        query: label.clone(),
                        results,
                    });
                }
                SearchEvent::Stderr(text) => {
                    tracing::warn!(search_id = task.id(), stderr = %text.trim_end(), "search stderr");
                }
                SearchEvent::Exit(reason) => {
                    let _ = tx.send(SessionMessage::End {
                        query: label.clone(),
                        reason,
                    });
                }
            });

        tracing::debug!(search_id = task.id(), pattern, ignore_case, "session search");
        *current = Some(task);
        true
    }

    /// Asks for the next batch. Returns `false` when there is nothing to
    /// resume.
    pub fn load_more(&self) -> bool {
        let current = self.current();
        match current.as_ref() {
            Some(task) if task.started() && task.paused() => task.try_resume(),
            _ => false,
        }
    }

    /// Kills the current query, if any is still running.
    pub fn close(&self) {
        let task = self.current().take();
        if let Some(task) = task {
            if task.try_kill() {
                tracing::debug!(search_id = task.id(), "session closed running search");
            }
        }
    }

    pub fn current_query(&self) -> Option<Query> {
        self.current().as_ref().map(|task| task.query().clone())
    }
}

impl Drop for SearchSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "../../../../tests/unit/services/adapters/search/session.rs"]
mod tests;
