//! 事件队列与奖励队列
//!
//! 评估循环只依赖 `EventSource` / `RewardSink` 两个 trait，
//! 具体实现可以是进程内通道，也可以是 Kafka。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reward_shared::config::KafkaConfig;
use reward_shared::error::InfraError;
use reward_shared::kafka::{KafkaConsumer, KafkaProducer};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

use crate::error::QueueError;

/// 事件来源
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSource: Send + Sync {
    /// 取出下一条原始消息，队列为空时等待
    ///
    /// 返回的 future 被取消时不能丢失消息。
    async fn dequeue(&self, topic: &str) -> Result<Vec<u8>, QueueError>;
}

/// 奖励投递目标
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RewardSink: Send + Sync {
    async fn enqueue(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), QueueError>;
}

// ---------------------------------------------------------------------------
// MemoryQueue
// ---------------------------------------------------------------------------

/// 进程内队列中的一条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

struct Channel {
    /// 关闭后置为 None，接收端取完积压消息即返回 `None`
    tx: Mutex<Option<mpsc::Sender<QueuedMessage>>>,
    rx: Mutex<mpsc::Receiver<QueuedMessage>>,
}

/// 基于 tokio mpsc 的多 topic 进程内队列
///
/// 同时实现 `EventSource` 与 `RewardSink`，用于进程内嵌入和测试。
/// topic 在首次使用时创建；多个消费者共享同一接收端，每条消息只会被取走一次。
#[derive(Clone)]
pub struct MemoryQueue {
    capacity: usize,
    channels: Arc<Mutex<HashMap<String, Arc<Channel>>>>,
}

impl MemoryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn channel(&self, topic: &str) -> Arc<Channel> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(topic.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(self.capacity);
                Arc::new(Channel {
                    tx: Mutex::new(Some(tx)),
                    rx: Mutex::new(rx),
                })
            })
            .clone()
    }

    /// 写入一条消息，队列满时等待
    pub async fn push(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: Vec<u8>,
    ) -> Result<(), QueueError> {
        let closed = || QueueError::Closed {
            topic: topic.to_string(),
        };
        let channel = self.channel(topic).await;
        let tx = channel.tx.lock().await.clone().ok_or_else(closed)?;
        let message = QueuedMessage {
            key: key.map(String::from),
            payload,
        };
        tx.send(message).await.map_err(|_| closed())
    }

    /// 取出下一条完整消息（含 key）
    pub async fn pop(&self, topic: &str) -> Result<QueuedMessage, QueueError> {
        let channel = self.channel(topic).await;
        let mut rx = channel.rx.lock().await;
        rx.recv().await.ok_or_else(|| QueueError::Closed {
            topic: topic.to_string(),
        })
    }

    /// 非阻塞地取出当前积压的全部消息
    pub async fn drain(&self, topic: &str) -> Vec<QueuedMessage> {
        let channel = self.channel(topic).await;
        let mut rx = channel.rx.lock().await;
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// 关闭 topic：不再接受写入，已积压的消息仍可取出，取完后返回 `Closed`
    pub async fn close(&self, topic: &str) {
        let channel = self.channel(topic).await;
        channel.tx.lock().await.take();
        info!(topic, "内存队列已关闭");
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventSource for MemoryQueue {
    async fn dequeue(&self, topic: &str) -> Result<Vec<u8>, QueueError> {
        self.pop(topic).await.map(|message| message.payload)
    }
}

#[async_trait]
impl RewardSink for MemoryQueue {
    async fn enqueue(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        self.push(topic, Some(key), payload).await
    }
}

// ---------------------------------------------------------------------------
// Kafka
// ---------------------------------------------------------------------------

/// Kafka 事件来源
///
/// 订阅关系在构造时确定，`dequeue` 的 topic 参数只用于日志。
pub struct KafkaEventSource {
    consumer: KafkaConsumer,
}

impl KafkaEventSource {
    pub fn new(config: &KafkaConfig, topic: &str) -> Result<Self, InfraError> {
        let consumer = KafkaConsumer::new(config)?;
        consumer.subscribe(&[topic])?;
        Ok(Self { consumer })
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    async fn dequeue(&self, topic: &str) -> Result<Vec<u8>, QueueError> {
        let message = self.consumer.recv().await?;
        if message.topic != topic {
            debug!(expected = topic, actual = %message.topic, "收到非预期 topic 的消息");
        }
        Ok(message.payload)
    }
}

/// Kafka 奖励投递
#[derive(Clone)]
pub struct KafkaRewardSink {
    producer: KafkaProducer,
}

impl KafkaRewardSink {
    pub fn new(config: &KafkaConfig) -> Result<Self, InfraError> {
        Ok(Self {
            producer: KafkaProducer::new(config)?,
        })
    }
}

#[async_trait]
impl RewardSink for KafkaRewardSink {
    async fn enqueue(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        self.producer.send(topic, Some(key), &payload).await?;
        Ok(())
    }
}
