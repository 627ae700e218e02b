//! gtsearch - 基于 grep 的有界并发搜索库
//!
//! 模块结构：
//! - services::ports: 数据契约与配置
//! - services::adapters: 进程搜索、缓冲、调度、会话、设置与路径

pub mod services;
