use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAX_CONCURRENT: usize = 5;
pub const DEFAULT_BATCH_SIZE: usize = 40;
pub const DEFAULT_PAUSE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_PROGRAM: &str = "grep";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Upper bound on searches with a live process.
    pub max_concurrent: usize,
    /// Matches delivered per tick.
    pub batch_size: usize,
    /// How long a paused search may stay paused before it is killed.
    pub pause_timeout_ms: u64,
    /// The grep-compatible tool to run.
    pub program: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            batch_size: DEFAULT_BATCH_SIZE,
            pause_timeout_ms: DEFAULT_PAUSE_TIMEOUT_MS,
            program: DEFAULT_PROGRAM.to_string(),
        }
    }
}

impl SearchConfig {
    pub fn pause_timeout(&self) -> Duration {
        Duration::from_millis(self.pause_timeout_ms)
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_pause_timeout(mut self, timeout: Duration) -> Self {
        self.pause_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Zero caps would stall every search forever.
    pub fn validated(mut self) -> Self {
        self.max_concurrent = self.max_concurrent.max(1);
        self.batch_size = self.batch_size.max(1);
        if self.program.trim().is_empty() {
            self.program = DEFAULT_PROGRAM.to_string();
        }
        self
    }
}
