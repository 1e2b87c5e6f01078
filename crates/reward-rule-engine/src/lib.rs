//! 奖励规则引擎
//!
//! 提供可热更新的奖励规则评估能力，支持：
//! - JSON 规则文档解析与条件表达式编译
//! - 按奖励值降序的优先级匹配
//! - 基于原子快照替换的规则注册表

pub mod compiler;
pub mod error;
pub mod evaluator;
pub mod loader;
pub mod models;
pub mod operators;
pub mod registry;

pub use compiler::RuleCompiler;
pub use error::{Result, RuleError};
pub use evaluator::RuleEvaluator;
pub use loader::{DirectoryRuleSource, RuleLoader, RuleSource, SourceDocument, StaticRuleSource};
pub use models::{Condition, Event, Reward, Rule, RuleDefinition, RuleDocument, RuleSet};
pub use operators::Operator;
pub use registry::{LoadStatus, RegistrySnapshot, RuleRegistry};
