//! 奖励评估 Worker
//!
//! 从事件队列消费事件，按当前规则表匹配奖励并投递到奖励队列；
//! 后台重载任务定期刷新规则表。

pub mod codec;
pub mod error;
pub mod evaluation;
pub mod queue;
pub mod reloader;
pub mod watcher;

pub use error::{QueueError, Result, WorkerError};
pub use evaluation::{EvaluationLoop, EvaluationOutcome};
pub use queue::{EventSource, KafkaEventSource, KafkaRewardSink, MemoryQueue, QueuedMessage, RewardSink};
pub use reloader::RuleReloader;
pub use watcher::RuleDirWatcher;
