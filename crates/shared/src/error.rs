//! 统一错误处理模块
//!
//! 定义各服务共享的基础设施错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum InfraError {
    /// 客户端创建、订阅、收发消息失败，附带 rdkafka 的原始错误信息
    #[error("Kafka 错误: {0}")]
    Kafka(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, InfraError>;
