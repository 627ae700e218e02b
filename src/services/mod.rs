//! 服务层模块
//!
//! - ports: 数据契约（Query, Match, ExitReason, SearchConfig, Settings）
//! - adapters: 基于 tokio 的实现（grep 进程、缓冲、调度、会话、设置文件）

pub mod adapters;
pub mod ports;

pub use adapters::{DeferredSearch, SearchScheduler, SearchSession, SessionMessage};
pub use ports::{ExitReason, Match, Query, SearchConfig, SearchEvent, Settings};
