//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::observability::ObservabilityConfig;

/// Kafka 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub brokers: String,
    pub consumer_group: String,
    pub auto_offset_reset: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            consumer_group: "reward-engine".to_string(),
            auto_offset_reset: "earliest".to_string(),
        }
    }
}

/// 规则源配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// 规则文件所在目录
    pub dir: String,
    /// 规则文件名后缀，只有以此结尾的文件才会被加载
    pub file_suffix: String,
    /// 定时重载间隔（秒）
    pub reload_interval_secs: u64,
    /// 是否监听目录变化并触发即时重载
    pub watch_enabled: bool,
    /// 文件变化去抖窗口（毫秒）
    pub debounce_ms: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            dir: "rules".to_string(),
            file_suffix: "-rules.json".to_string(),
            reload_interval_secs: 300,
            watch_enabled: false,
            debounce_ms: 2000,
        }
    }
}

impl RulesConfig {
    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// 事件评估循环配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 事件队列 topic
    pub event_topic: String,
    /// 奖励队列 topic
    pub reward_topic: String,
    /// 出队失败后的退避时间（毫秒）
    pub dequeue_backoff_ms: u64,
    /// 并行评估 worker 数量
    pub workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_topic: "RuleEvents".to_string(),
            reward_topic: "Rewards".to_string(),
            dequeue_backoff_ms: 1000,
            workers: 1,
        }
    }
}

impl EngineConfig {
    pub fn dequeue_backoff(&self) -> Duration {
        Duration::from_millis(self.dequeue_backoff_ms)
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub kafka: KafkaConfig,
    pub rules: RulesConfig,
    pub engine: EngineConfig,
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "reward-worker".to_string(),
            environment: "development".to_string(),
            kafka: KafkaConfig::default(),
            rules: RulesConfig::default(),
            engine: EngineConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（REWARD_ 前缀，如 REWARD_RULES__DIR -> rules.dir）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("REWARD_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            // 字段名本身含下划线（如 reload_interval_secs），因此层级分隔符使用双下划线
            .add_source(
                Environment::with_prefix("REWARD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}
