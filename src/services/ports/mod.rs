//! Service ports: traits + data contracts.

pub mod config;
pub mod search;
pub mod settings;

pub use config::SearchConfig;
pub use search::{
    ExitReason, Match, Query, Result as SearchResult, SearchError, SearchEvent, Signal,
};
pub use settings::Settings;
