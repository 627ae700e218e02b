use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Debug)]
pub enum SearchError {
    Io(io::Error),
    Settings(serde_json::Error),
}

impl std::fmt::Display for SearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchError::Io(e) => write!(f, "IO error: {}", e),
            SearchError::Settings(e) => write!(f, "Invalid settings: {}", e),
        }
    }
}

impl std::error::Error for SearchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SearchError::Io(e) => Some(e),
            SearchError::Settings(e) => Some(e),
        }
    }
}

impl From<io::Error> for SearchError {
    fn from(e: io::Error) -> Self {
        SearchError::Io(e)
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(e: serde_json::Error) -> Self {
        SearchError::Settings(e)
    }
}

/// A literal substring search over one directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub root_directory: PathBuf,
    pub pattern: String,
    pub ignore_case: bool,
}

impl Query {
    pub fn new(root_directory: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            root_directory: root_directory.into(),
            pattern: pattern.into(),
            ignore_case: false,
        }
    }

    pub fn ignore_case(mut self, ignore_case: bool) -> Self {
        self.ignore_case = ignore_case;
        self
    }
}

/// One matching line as reported by the search tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub file_path: String,
    /// 1-based.
    pub line_number: u64,
    /// Byte offset of the start of the line within the file.
    pub byte_offset: u64,
    pub line: String,
}

impl Match {
    pub fn new(
        file_path: impl Into<String>,
        line_number: u64,
        byte_offset: u64,
        line: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            line_number,
            byte_offset,
            line: line.into(),
        }
    }
}

/// Terminal outcome of a search. Set at most once per search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The tool ran to completion with this status code.
    Completed(i32),
    /// The search was asked to terminate.
    Terminated,
    Failed(String),
}

impl ExitReason {
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitReason::Completed(code) => Some(*code),
            _ => None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, ExitReason::Terminated)
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Completed(code) => write!(f, "completed with status {}", code),
            ExitReason::Terminated => write!(f, "terminated"),
            ExitReason::Failed(cause) => write!(f, "failed: {}", cause),
        }
    }
}

/// Signals a running search process understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Stop,
    Continue,
}

impl Signal {
    #[cfg(unix)]
    pub fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Stop => libc::SIGSTOP,
            Signal::Continue => libc::SIGCONT,
        }
    }
}

/// Outbound events of every search component. `Exit` is always the last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEvent {
    Results(Vec<Match>),
    Stderr(String),
    Exit(ExitReason),
}
