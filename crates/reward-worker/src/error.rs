//! Worker 错误类型
//!
//! 在规则引擎与共享基础设施错误之上补充队列、编解码等本服务特有的失败原因。

use reward_shared::error::InfraError;
use rule_engine::RuleError;

/// 队列操作错误
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// 队列已关闭，评估循环据此正常退出
    #[error("队列已关闭: {topic}")]
    Closed { topic: String },

    #[error(transparent)]
    Infra(#[from] InfraError),
}

impl QueueError {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

/// 奖励 Worker 错误
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// 队列中的消息无法解码，只影响这一条消息
    #[error("消息解码失败: {0}")]
    Decode(#[source] bincode::Error),

    #[error("消息编码失败: {0}")]
    Encode(#[source] bincode::Error),

    #[error("队列操作失败: {0}")]
    Queue(#[from] QueueError),

    /// 事件名没有对应的规则集，按未命中处理
    #[error("事件没有对应的规则集: {event_name}")]
    NoRuleSetForEvent { event_name: String },

    #[error("规则目录监听失败: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Infra(#[from] InfraError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
