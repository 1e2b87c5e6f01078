//! 规则注册表
//!
//! 进程级的 `event_name -> RuleSet` 表，使用 `ArcSwap` 整表原子替换：
//! 读取端一次原子 load 拿到完整快照，写入端发布全新的表，
//! 读者永远看不到新旧规则混杂的状态。

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::models::RuleSet;

/// 某一时刻发布的完整规则表
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    rule_sets: HashMap<String, Arc<RuleSet>>,
    loaded_at: Option<DateTime<Utc>>,
}

impl RegistrySnapshot {
    fn new(rule_sets: HashMap<String, RuleSet>) -> Self {
        Self {
            rule_sets: rule_sets
                .into_iter()
                .map(|(name, set)| (name, Arc::new(set)))
                .collect(),
            loaded_at: Some(Utc::now()),
        }
    }

    pub fn get(&self, event_name: &str) -> Option<&Arc<RuleSet>> {
        self.rule_sets.get(event_name)
    }

    pub fn len(&self) -> usize {
        self.rule_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rule_sets.is_empty()
    }

    /// 所有规则集中的规则总数
    pub fn rule_count(&self) -> usize {
        self.rule_sets.values().map(|set| set.len()).sum()
    }

    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rule_sets.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<RuleSet>)> {
        self.rule_sets.iter()
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }
}

/// 注册表加载状态
#[derive(Debug, Clone, PartialEq)]
pub struct LoadStatus {
    pub loaded: bool,
    pub rule_set_count: usize,
    pub rule_count: usize,
    pub last_loaded_at: Option<DateTime<Utc>>,
    pub event_names: Vec<String>,
}

/// 规则注册表
///
/// Clone 只复制 Arc，多个评估 worker 与重载任务共享同一张表。
#[derive(Clone, Default)]
pub struct RuleRegistry {
    current: Arc<ArcSwap<RegistrySnapshot>>,
}

impl RuleRegistry {
    /// 创建空注册表（尚未加载）
    pub fn new() -> Self {
        Self::default()
    }

    /// 用已编译的规则表创建注册表
    pub fn with_rule_sets(rule_sets: HashMap<String, RuleSet>) -> Self {
        let registry = Self::new();
        registry.replace_all(rule_sets);
        registry
    }

    /// 获取某事件当前的规则集
    pub fn get(&self, event_name: &str) -> Option<Arc<RuleSet>> {
        self.current.load().get(event_name).cloned()
    }

    /// 获取当前完整快照
    ///
    /// 同一快照内的所有规则集来自同一次发布。
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// 整表替换
    pub fn replace_all(&self, rule_sets: HashMap<String, RuleSet>) {
        let snapshot = RegistrySnapshot::new(rule_sets);
        let rule_set_count = snapshot.len();
        let rule_count = snapshot.rule_count();
        self.current.store(Arc::new(snapshot));

        info!(rule_set_count, rule_count, "规则注册表已替换");
    }

    /// 是否已发布过规则表
    pub fn is_loaded(&self) -> bool {
        self.current.load().loaded_at.is_some()
    }

    pub fn load_status(&self) -> LoadStatus {
        let snapshot = self.current.load();
        LoadStatus {
            loaded: snapshot.loaded_at.is_some(),
            rule_set_count: snapshot.len(),
            rule_count: snapshot.rule_count(),
            last_loaded_at: snapshot.loaded_at,
            event_names: snapshot.event_names(),
        }
    }
}
