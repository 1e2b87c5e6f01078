//! 规则评估器
//!
//! 判断单条规则是否命中事件，并在规则集中选出优先级最高的命中规则。

use crate::models::{Condition, Event, Rule, RuleSet};
use crate::operators::Operator;

/// 规则评估器
pub struct RuleEvaluator;

impl RuleEvaluator {
    /// 评估规则是否命中事件
    ///
    /// 先检查有效期，再按顺序评估条件，任一条件不满足立即返回。
    pub fn evaluate(rule: &Rule, event: &Event) -> bool {
        if !rule.is_active_at(event.timestamp) {
            return false;
        }

        rule.conditions.iter().all(|condition| {
            // 事件缺少条件字段时整条规则不命中
            event
                .meta
                .get(&condition.field)
                .is_some_and(|value| Self::evaluate_condition(condition, value))
        })
    }

    /// 评估单个条件
    ///
    /// 数值比较时任一侧无法解析为整数都视为不满足，而不是错误。
    pub fn evaluate_condition(condition: &Condition, value: &str) -> bool {
        match condition.operator {
            Operator::Equal => value == condition.raw_value,
            Operator::NotEqual => value != condition.raw_value,
            Operator::In => Self::contains(&condition.value_set, value),
            Operator::NotIn => !Self::contains(&condition.value_set, value),
            Operator::LessThan => Self::compare(value, &condition.raw_value, |a, b| a < b),
            Operator::LessThanOrEqual => Self::compare(value, &condition.raw_value, |a, b| a <= b),
            Operator::GreaterThan => Self::compare(value, &condition.raw_value, |a, b| a > b),
            Operator::GreaterThanOrEqual => {
                Self::compare(value, &condition.raw_value, |a, b| a >= b)
            }
        }
    }

    /// 按存储顺序（奖励值降序）返回第一条命中的规则
    pub fn select_reward<'a>(rule_set: &'a RuleSet, event: &Event) -> Option<&'a Rule> {
        rule_set
            .rules()
            .iter()
            .find(|rule| Self::evaluate(rule, event))
    }

    /// 十进制 32 位整数比较
    fn compare<F>(value: &str, expected: &str, cmp: F) -> bool
    where
        F: Fn(i32, i32) -> bool,
    {
        match (value.parse::<i32>(), expected.parse::<i32>()) {
            (Ok(v), Ok(e)) => cmp(v, e),
            _ => false,
        }
    }

    fn contains(values: &[String], value: &str) -> bool {
        values.iter().any(|v| v == value)
    }
}
