//! 规则编译器
//!
//! 将规则文档中的条件表达式与日期文本编译为可直接评估的 `RuleSet`。
//! 任何一条规则有误都会使整个文档编译失败，不会产生部分结果。

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

use crate::error::{Result, RuleError};
use crate::models::{Condition, Rule, RuleDefinition, RuleDocument, RuleSet};
use crate::operators::Operator;

/// 规则文档中日期的固定格式，按 UTC 解释
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// 规则编译器
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleCompiler;

impl RuleCompiler {
    pub fn new() -> Self {
        Self
    }

    /// 从 JSON 字符串编译规则集
    pub fn compile_from_json(&self, json: &str) -> Result<RuleSet> {
        let document: RuleDocument =
            serde_json::from_str(json).map_err(|source| RuleError::Json {
                origin: "<inline>".to_string(),
                source,
            })?;
        self.compile(document)
    }

    /// 编译规则文档
    pub fn compile(&self, document: RuleDocument) -> Result<RuleSet> {
        let rules = document
            .rules
            .iter()
            .map(|definition| self.compile_rule(definition))
            .collect::<Result<Vec<_>>>()?;

        Ok(RuleSet::new(document.event, document.application, rules))
    }

    fn compile_rule(&self, definition: &RuleDefinition) -> Result<Rule> {
        let conditions = definition
            .conditions
            .iter()
            .map(|text| Self::parse_condition(text))
            .collect::<Result<Vec<_>>>()?;

        let (start_time, end_time) = Self::parse_window(definition)?;

        Ok(Rule {
            id: definition.id.clone(),
            message: definition.message.clone(),
            conditions,
            reward: definition.reward,
            start_time,
            end_time,
        })
    }

    /// 解析条件表达式 `"<字段> <操作符> <值>[,<值>...]"`
    ///
    /// 前两个空白分隔的片段是字段与操作符，剩余部分整体作为值表达式（可含空格）。
    pub fn parse_condition(text: &str) -> Result<Condition> {
        let malformed = || RuleError::MalformedCondition {
            condition: text.to_string(),
        };

        let trimmed = text.trim();
        let (field, rest) = trimmed
            .split_once(char::is_whitespace)
            .ok_or_else(malformed)?;
        let (symbol, value) = rest
            .trim_start()
            .split_once(char::is_whitespace)
            .ok_or_else(malformed)?;
        let value = value.trim();
        if value.is_empty() {
            return Err(malformed());
        }

        let operator = Operator::from_symbol(symbol)?;
        Ok(Condition::new(field, operator, value))
    }

    /// 解析有效期
    ///
    /// 结束时间取自 `end_date`；开始晚于结束的窗口永远不可能命中，按日期错误拒绝。
    fn parse_window(definition: &RuleDefinition) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let invalid = || RuleError::InvalidDateRange {
            rule_id: definition.id.clone(),
            start: definition.start_date.clone(),
            end: definition.end_date.clone(),
        };

        let (Some(start), Some(end)) = (
            Self::parse_timestamp(&definition.start_date),
            Self::parse_timestamp(&definition.end_date),
        ) else {
            warn!(
                rule_id = %definition.id,
                start_date = %definition.start_date,
                end_date = %definition.end_date,
                "规则日期解析失败"
            );
            return Err(invalid());
        };

        if start > end {
            warn!(
                rule_id = %definition.id,
                start_date = %definition.start_date,
                end_date = %definition.end_date,
                "规则开始时间晚于结束时间"
            );
            return Err(invalid());
        }

        Ok((start, end))
    }

    /// 按固定格式解析时间戳
    pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(text.trim(), DATE_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }
}
