//! 事件评估循环
//!
//! 每轮：出队 -> 解码 -> 查找规则集 -> 匹配 -> 编码奖励 -> 投递奖励。
//! 单条消息的任何失败只记录日志与指标，循环继续处理下一条；
//! 解码失败与出队失败一样先退避再继续。

use std::sync::Arc;
use std::time::Duration;

use reward_shared::config::EngineConfig;
use reward_shared::observability::metrics;
use rule_engine::{Event, Reward, RuleEvaluator, RuleRegistry};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::error::{Result, WorkerError};
use crate::queue::{EventSource, RewardSink};

/// 单条事件的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationOutcome {
    /// 命中规则并已投递奖励
    Rewarded { rule_id: String, amount: i32 },
    NoMatch,
    /// 事件名没有对应的规则集
    NoRuleSet,
}

impl EvaluationOutcome {
    /// 指标标签
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rewarded { .. } => "rewarded",
            Self::NoMatch => "no_match",
            Self::NoRuleSet => "no_rule_set",
        }
    }
}

/// 事件评估循环
///
/// 只读取注册表，不持有任何跨评估的锁；多个 worker 可共享同一个实例。
pub struct EvaluationLoop {
    registry: RuleRegistry,
    source: Arc<dyn EventSource>,
    sink: Arc<dyn RewardSink>,
    event_topic: String,
    reward_topic: String,
    backoff: Duration,
}

impl EvaluationLoop {
    pub fn new(
        registry: RuleRegistry,
        source: Arc<dyn EventSource>,
        sink: Arc<dyn RewardSink>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            registry,
            source,
            sink,
            event_topic: config.event_topic.clone(),
            reward_topic: config.reward_topic.clone(),
            backoff: config.dequeue_backoff(),
        }
    }

    /// 运行循环直到收到 shutdown 信号或事件队列关闭，返回处理的消息数
    ///
    /// 只在等待出队和退避期间响应 shutdown，已出队的事件总会完整处理完。
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> u64 {
        info!(
            event_topic = %self.event_topic,
            reward_topic = %self.reward_topic,
            "事件评估循环已启动"
        );

        let mut processed = 0u64;
        loop {
            if *shutdown.borrow() {
                break;
            }

            let dequeued = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                result = self.source.dequeue(&self.event_topic) => result,
            };

            match dequeued {
                Ok(payload) => {
                    processed += 1;
                    match self.handle_payload(&payload).await {
                        Ok(_) => {}
                        Err(e @ WorkerError::Decode(_)) => {
                            warn!(
                                error = %e,
                                backoff_ms = self.backoff.as_millis() as u64,
                                "事件解码失败，退避后继续"
                            );
                            if self.back_off(&mut shutdown).await {
                                break;
                            }
                        }
                        Err(e) => error!(error = %e, "事件处理失败"),
                    }
                }
                Err(e) if e.is_closed() => {
                    info!(topic = %self.event_topic, "事件队列已关闭");
                    break;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff_ms = self.backoff.as_millis() as u64,
                        "事件出队失败，退避后重试"
                    );
                    if self.back_off(&mut shutdown).await {
                        break;
                    }
                }
            }
        }

        info!(processed, "事件评估循环已停止");
        processed
    }

    /// 退避等待，期间收到 shutdown 返回 true
    async fn back_off(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            biased;
            changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
            _ = tokio::time::sleep(self.backoff) => false,
        }
    }

    /// 处理一条原始消息
    ///
    /// 解码、编码与投递失败以错误返回；无规则集和未命中是正常结果。
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<EvaluationOutcome> {
        let event = codec::decode_event(payload).inspect_err(|_| {
            metrics::record_decode_failure();
        })?;

        let outcome = match self.evaluate(&event) {
            Ok(Some(reward)) => {
                let outcome = EvaluationOutcome::Rewarded {
                    rule_id: reward.rule.id.clone(),
                    amount: reward.amount,
                };
                self.deliver(&reward).await.inspect_err(|_| {
                    metrics::record_sink_failure();
                })?;
                info!(
                    event_name = %event.event_name,
                    rule_id = %reward.rule.id,
                    amount = reward.amount,
                    "奖励已投递"
                );
                outcome
            }
            Ok(None) => {
                debug!(event_name = %event.event_name, "没有命中的规则");
                EvaluationOutcome::NoMatch
            }
            Err(WorkerError::NoRuleSetForEvent { event_name }) => {
                warn!(event_name = %event_name, "事件没有对应的规则集，跳过");
                EvaluationOutcome::NoRuleSet
            }
            Err(e) => return Err(e),
        };

        metrics::record_event_outcome(outcome.as_str());
        Ok(outcome)
    }

    /// 用当前规则表匹配事件
    pub fn evaluate(&self, event: &Event) -> Result<Option<Reward>> {
        let rule_set =
            self.registry
                .get(&event.event_name)
                .ok_or_else(|| WorkerError::NoRuleSetForEvent {
                    event_name: event.event_name.clone(),
                })?;

        Ok(RuleEvaluator::select_reward(&rule_set, event)
            .map(|rule| Reward::new(event.clone(), rule.clone())))
    }

    async fn deliver(&self, reward: &Reward) -> Result<()> {
        let payload = codec::encode_reward(reward)?;
        self.sink
            .enqueue(&self.reward_topic, &reward.event.event_name, payload)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;
    use crate::queue::{MemoryQueue, MockEventSource, MockRewardSink};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use reward_shared::error::InfraError;
    use rule_engine::RuleCompiler;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const EVENTS: &str = "RuleEvents";
    const REWARDS: &str = "Rewards";

    fn registry() -> RuleRegistry {
        let set = RuleCompiler::new()
            .compile_from_json(
                r#"{
                    "event": "level_up",
                    "application": "game",
                    "rules": [
                        {"id": "r1", "message": "Reached level 5", "conditions": ["level >= 5"],
                         "start_date": "2024-01-01 00:00", "end_date": "2024-12-31 23:59",
                         "reward": 50}
                    ]
                }"#,
            )
            .unwrap();
        RuleRegistry::with_rule_sets(HashMap::from([(set.event_name.clone(), set)]))
    }

    fn config() -> EngineConfig {
        EngineConfig {
            dequeue_backoff_ms: 10,
            ..Default::default()
        }
    }

    fn event(name: &str, level: &str) -> Event {
        Event::new(name, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()).with_meta("level", level)
    }

    fn payload(name: &str, level: &str) -> Vec<u8> {
        codec::encode_event(&event(name, level)).unwrap()
    }

    fn memory_loop(queue: &MemoryQueue) -> EvaluationLoop {
        EvaluationLoop::new(
            registry(),
            Arc::new(queue.clone()),
            Arc::new(queue.clone()),
            &config(),
        )
    }

    #[tokio::test]
    async fn test_outcomes() {
        let queue = MemoryQueue::default();
        let lp = memory_loop(&queue);

        assert_eq!(
            lp.handle_payload(&payload("level_up", "7")).await.unwrap(),
            EvaluationOutcome::Rewarded {
                rule_id: "r1".to_string(),
                amount: 50
            }
        );
        assert_eq!(
            lp.handle_payload(&payload("level_up", "3")).await.unwrap(),
            EvaluationOutcome::NoMatch
        );
        assert_eq!(
            lp.handle_payload(&payload("level_up", "abc")).await.unwrap(),
            EvaluationOutcome::NoMatch
        );
        assert_eq!(
            lp.handle_payload(&payload("login", "7")).await.unwrap(),
            EvaluationOutcome::NoRuleSet
        );

        // 只有命中的那条事件产生奖励
        let rewards = queue.drain(REWARDS).await;
        assert_eq!(rewards.len(), 1);
        assert_eq!(rewards[0].key.as_deref(), Some("level_up"));
        let reward = codec::decode_reward(&rewards[0].payload).unwrap();
        assert_eq!(reward.amount, 50);
        assert_eq!(reward.event, event("level_up", "7"));
    }

    #[tokio::test]
    async fn test_decode_failure_is_error_without_reward() {
        let queue = MemoryQueue::default();
        let lp = memory_loop(&queue);

        let err = lp.handle_payload(b"garbage").await.unwrap_err();
        assert!(matches!(err, WorkerError::Decode(_)));
        assert!(queue.drain(REWARDS).await.is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_is_reported() {
        let mut sink = MockRewardSink::new();
        sink.expect_enqueue()
            .times(1)
            .returning(|_, _, _| Err(QueueError::Infra(InfraError::Kafka("超时".to_string()))));

        let lp = EvaluationLoop::new(
            registry(),
            Arc::new(MemoryQueue::default()),
            Arc::new(sink),
            &config(),
        );

        let err = lp.handle_payload(&payload("level_up", "9")).await.unwrap_err();
        assert!(matches!(err, WorkerError::Queue(_)));
    }

    #[tokio::test]
    async fn test_run_processes_until_queue_closed() {
        let queue = MemoryQueue::default();
        for (name, level) in [("level_up", "7"), ("level_up", "1"), ("login", "9"), ("level_up", "5")] {
            queue.push(EVENTS, None, payload(name, level)).await.unwrap();
        }
        // 损坏消息不会中断循环
        queue.push(EVENTS, None, b"\x00\x01".to_vec()).await.unwrap();
        queue.push(EVENTS, None, payload("level_up", "8")).await.unwrap();
        queue.close(EVENTS).await;

        let (_tx, rx) = watch::channel(false);
        let processed = memory_loop(&queue).run(rx).await;
        assert_eq!(processed, 6);

        let amounts: Vec<i32> = queue
            .drain(REWARDS)
            .await
            .iter()
            .map(|m| codec::decode_reward(&m.payload).unwrap().amount)
            .collect();
        assert_eq!(amounts, vec![50, 50, 50]);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_stop_loop() {
        let queue = MemoryQueue::default();
        queue.push(EVENTS, None, payload("level_up", "7")).await.unwrap();
        queue.push(EVENTS, None, payload("level_up", "8")).await.unwrap();
        queue.close(EVENTS).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let mut sink = MockRewardSink::new();
        let counter = calls.clone();
        sink.expect_enqueue().times(2).returning(move |_, _, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(QueueError::Infra(InfraError::Kafka("broker 不可达".to_string())))
            } else {
                Ok(())
            }
        });

        let lp = EvaluationLoop::new(registry(), Arc::new(queue.clone()), Arc::new(sink), &config());
        let (_tx, rx) = watch::channel(false);
        assert_eq!(lp.run(rx).await, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dequeue_failure_backs_off_and_retries() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let ok_payload = payload("level_up", "6");

        let mut source = MockEventSource::new();
        source.expect_dequeue().returning(move |_| {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(QueueError::Infra(InfraError::Kafka("rebalance".to_string()))),
                2 => Ok(ok_payload.clone()),
                _ => Err(QueueError::Closed {
                    topic: EVENTS.to_string(),
                }),
            }
        });

        let queue = MemoryQueue::default();
        let lp = EvaluationLoop::new(registry(), Arc::new(source), Arc::new(queue.clone()), &config());
        let (_tx, rx) = watch::channel(false);

        assert_eq!(lp.run(rx).await, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(queue.drain(REWARDS).await.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_loop() {
        let queue = MemoryQueue::default();
        let lp = Arc::new(memory_loop(&queue));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn({
            let lp = lp.clone();
            async move { lp.run(rx).await }
        });

        queue.push(EVENTS, None, payload("level_up", "7")).await.unwrap();
        let reward = tokio::time::timeout(Duration::from_secs(5), queue.pop(REWARDS))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reward.key.as_deref(), Some("level_up"));

        tx.send(true).unwrap();
        let processed = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(processed, 1);
    }

    #[tokio::test]
    async fn test_already_shut_down_processes_nothing() {
        let queue = MemoryQueue::default();
        queue.push(EVENTS, None, payload("level_up", "7")).await.unwrap();

        let (_tx, rx) = watch::channel(true);
        assert_eq!(memory_loop(&queue).run(rx).await, 0);
        assert!(queue.drain(REWARDS).await.is_empty());
    }

    #[tokio::test]
    async fn test_reads_swapped_registry() {
        let queue = MemoryQueue::default();
        let registry = registry();
        let lp = EvaluationLoop::new(
            registry.clone(),
            Arc::new(queue.clone()),
            Arc::new(queue.clone()),
            &config(),
        );
        assert_eq!(
            lp.handle_payload(&payload("level_up", "7")).await.unwrap().as_str(),
            "rewarded"
        );

        registry.replace_all(HashMap::new());
        assert_eq!(
            lp.handle_payload(&payload("level_up", "7")).await.unwrap(),
            EvaluationOutcome::NoRuleSet
        );
    }

    #[tokio::test]
    async fn test_decode_failure_backs_off() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let mut source = MockEventSource::new();
        source.expect_dequeue().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                Ok(b"\xff\xff".to_vec())
            } else {
                Err(QueueError::Closed {
                    topic: EVENTS.to_string(),
                })
            }
        });

        let config = EngineConfig {
            dequeue_backoff_ms: 100,
            ..Default::default()
        };
        let queue = MemoryQueue::default();
        let lp = EvaluationLoop::new(registry(), Arc::new(source), Arc::new(queue.clone()), &config);
        let (_tx, rx) = watch::channel(false);

        let started = std::time::Instant::now();
        assert_eq!(lp.run(rx).await, 3);
        // 每条损坏消息之后都退避一次
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(queue.drain(REWARDS).await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_during_decode_backoff() {
        let mut source = MockEventSource::new();
        source.expect_dequeue().returning(|_| Ok(b"\xff\xff".to_vec()));

        let config = EngineConfig {
            dequeue_backoff_ms: 60_000,
            ..Default::default()
        };
        let lp = Arc::new(EvaluationLoop::new(
            registry(),
            Arc::new(source),
            Arc::new(MemoryQueue::default()),
            &config,
        ));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let lp = lp.clone();
            async move { lp.run(rx).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        let processed = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(processed, 1);
    }

    /// 投递时先通知 `entered`，等待 `release` 后才完成
    #[derive(Default)]
    struct GatedSink {
        entered: Notify,
        release: Notify,
        delivered: AtomicUsize,
    }

    #[async_trait]
    impl RewardSink for GatedSink {
        async fn enqueue(
            &self,
            _topic: &str,
            _key: &str,
            _payload: Vec<u8>,
        ) -> std::result::Result<(), QueueError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_in_flight_event_completes_before_shutdown() {
        let queue = MemoryQueue::default();
        queue.push(EVENTS, None, payload("level_up", "7")).await.unwrap();

        let sink = Arc::new(GatedSink::default());
        let lp = Arc::new(EvaluationLoop::new(
            registry(),
            Arc::new(queue.clone()),
            sink.clone(),
            &config(),
        ));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let lp = lp.clone();
            async move { lp.run(rx).await }
        });

        tokio::time::timeout(Duration::from_secs(5), sink.entered.notified())
            .await
            .unwrap();
        tx.send(true).unwrap();

        // shutdown 不会打断正在投递的奖励
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 0);

        sink.release.notify_one();
        let processed = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(processed, 1);
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 1);
    }
}
