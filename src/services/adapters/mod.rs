//! Adapters: OS and runtime implementations of the ports.

pub mod paths;
pub mod search;
pub mod settings;

pub use paths::{ensure_log_dir, fallback_log_dir, get_log_dir};
pub use search::{
    BufferedSearch, DeferredSearch, Listener, ProcessSearch, SearchScheduler, SearchSession,
    SessionMessage,
};
pub use settings::{
    ensure_settings_file, get_settings_path, load_settings, load_settings_from,
    write_default_settings,
};
