//! 基于外部 grep 进程的搜索
//!
//! Layers, bottom to top:
//! - [`ProcessSearch`]: one grep child, parsed stdout, exactly one `Exit`
//! - [`BufferedSearch`]: batching, pause/resume with failsafe timeout
//! - [`DeferredSearch`]: a task that may be cancelled before it spawns
//! - [`SearchScheduler`]: bounded concurrency over deferred tasks
//! - [`SearchSession`]: one live query at a time, for interactive callers

use crate::services::ports::search::SearchEvent;

mod buffered;
mod deferred;
pub mod parser;
mod process;
mod scheduler;
mod session;

pub use buffered::BufferedSearch;
pub use deferred::DeferredSearch;
pub use parser::{parse_record, parse_records, LineParser};
pub use process::ProcessSearch;
pub use scheduler::SearchScheduler;
pub use session::{SearchSession, SessionMessage};

/// Event callback. Receives the handle of the search that produced the event
/// so it can pause, resume or kill from inside the callback.
pub type Listener<T> = Box<dyn FnMut(&T, SearchEvent) + Send + 'static>;
