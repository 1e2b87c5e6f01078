//! 规则引擎领域模型

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::operators::Operator;

// ---------------------------------------------------------------------------
// 规则文档（外部输入格式）
// ---------------------------------------------------------------------------

/// 单个事件的规则源文档
///
/// ```json
/// { "event": "level_up", "application": "game",
///   "rules": [ { "id": "r1", "message": "...", "conditions": ["level >= 5"],
///                "start_date": "2024-01-01 00:00", "end_date": "2024-12-31 23:59",
///                "reward": 50 } ] }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDocument {
    pub event: String,
    #[serde(default)]
    pub application: String,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

/// 文档中的规则定义，条件与日期仍是原始文本
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub conditions: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    pub reward: i32,
}

// ---------------------------------------------------------------------------
// 编译后的规则
// ---------------------------------------------------------------------------

/// 针对单个事件字段的条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    /// 原始比较值，用于标量比较
    pub raw_value: String,
    /// 按逗号拆分后的比较值，用于 in / notin
    pub value_set: Vec<String>,
}

impl Condition {
    /// 创建条件，值集合总是由原始值按逗号拆分得到
    pub fn new(field: impl Into<String>, operator: Operator, raw_value: impl Into<String>) -> Self {
        let raw_value = raw_value.into();
        let value_set = raw_value.split(',').map(String::from).collect();
        Self {
            field: field.into(),
            operator,
            raw_value,
            value_set,
        }
    }
}

/// 奖励规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub message: String,
    /// 全部条件同时满足才算匹配，空列表无条件匹配
    pub conditions: Vec<Condition>,
    pub reward: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl Rule {
    /// 时间戳是否落在规则有效期内（闭区间）
    pub fn is_active_at(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start_time && timestamp <= self.end_time
    }
}

/// 某个事件的规则集合
///
/// 规则在构造时按奖励值降序排列（稳定排序，同奖励值保持文档顺序），
/// 这个顺序就是匹配优先级。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub event_name: String,
    pub application_rule: String,
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(
        event_name: impl Into<String>,
        application_rule: impl Into<String>,
        mut rules: Vec<Rule>,
    ) -> Self {
        rules.sort_by_key(|r| std::cmp::Reverse(r.reward));
        Self {
            event_name: event_name.into(),
            application_rule: application_rule.into(),
            rules,
        }
    }

    /// 按优先级排列的规则
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ---------------------------------------------------------------------------
// 事件与奖励（队列消息）
// ---------------------------------------------------------------------------

/// 待匹配的业务事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_name: String,
    pub meta: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_name: event_name.into(),
            meta: HashMap::new(),
            timestamp,
        }
    }

    /// 追加一个属性
    pub fn with_meta(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(field.into(), value.into());
        self
    }
}

/// 奖励决策：触发事件、发放数量以及命中的规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    pub event: Event,
    pub amount: i32,
    pub rule: Rule,
}

impl Reward {
    pub fn new(event: Event, rule: Rule) -> Self {
        Self {
            amount: rule.reward,
            event,
            rule,
        }
    }
}
