//! 规则引擎错误类型
//!
//! 所有错误都发生在规则加载阶段，会中止触发本次加载的操作，但不会终止进程。

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("条件格式错误: '{condition}'，应为 \"<字段> <操作符> <值>\"")]
    MalformedCondition { condition: String },

    #[error("未知操作符: |{operator}|")]
    UnknownOperator { operator: String },

    #[error("规则 {rule_id} 的时间窗口无效: {start} | {end}")]
    InvalidDateRange {
        rule_id: String,
        start: String,
        end: String,
    },

    #[error("事件 {event_name} 的规则文档重复定义")]
    DuplicateEvent { event_name: String },

    #[error("读取规则源失败: {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("规则文档 JSON 解析失败: {origin}: {source}")]
    Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, RuleError>;

impl RuleError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedCondition { .. } => "MALFORMED_CONDITION",
            Self::UnknownOperator { .. } => "UNKNOWN_OPERATOR",
            Self::InvalidDateRange { .. } => "INVALID_DATE_RANGE",
            Self::DuplicateEvent { .. } => "DUPLICATE_EVENT",
            Self::Io { .. } => "RULE_SOURCE_IO",
            Self::Json { .. } => "RULE_SOURCE_JSON",
        }
    }
}
