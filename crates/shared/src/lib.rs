//! 共享库
//!
//! 包含奖励引擎各服务共用的配置、错误处理、Kafka 与可观测性基础设施代码。

pub mod config;
pub mod error;
pub mod kafka;
pub mod observability;
