//! 规则重载循环
//!
//! 按固定间隔重新加载全部规则，也可以由目录监听触发即时重载。
//! 只有整次加载成功才会替换注册表，失败时旧规则表继续生效。

use std::time::Duration;

use reward_shared::observability::metrics;
use rule_engine::{LoadStatus, RuleLoader, RuleRegistry};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// 规则重载器，注册表的唯一写入方
#[derive(Clone)]
pub struct RuleReloader {
    loader: RuleLoader,
    registry: RuleRegistry,
    interval: Duration,
}

impl RuleReloader {
    pub fn new(loader: RuleLoader, registry: RuleRegistry, interval: Duration) -> Self {
        Self {
            loader,
            registry,
            interval,
        }
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// 执行一次完整重载
    #[instrument(skip(self))]
    pub fn reload_once(&self) -> rule_engine::Result<LoadStatus> {
        match self.loader.load_all() {
            Ok(rule_sets) => {
                let count = rule_sets.len();
                self.registry.replace_all(rule_sets);
                metrics::record_rule_reload(true, Some(count));
                Ok(self.registry.load_status())
            }
            Err(e) => {
                error!(error = %e, code = e.code(), "规则重载失败，保留当前规则表");
                metrics::record_rule_reload(false, None);
                Err(e)
            }
        }
    }

    /// 在阻塞线程池中执行一次重载，返回是否成功
    ///
    /// 读取规则文件与编译都是同步操作，不占用异步 worker 线程。
    pub async fn reload(&self) -> bool {
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.reload_once()).await {
            Ok(Ok(status)) => {
                debug!(rule_sets = status.rule_set_count, rules = status.rule_count, "规则重载完成");
                true
            }
            Ok(Err(e)) => {
                // 失败已在 reload_once 中记录日志与指标
                debug!(error = %e, "本次重载未生效");
                false
            }
            Err(e) => {
                error!(error = %e, "规则重载任务异常退出");
                false
            }
        }
    }

    /// 运行重载循环直到收到 shutdown 信号
    ///
    /// 启动时不会立即重载，首次加载由调用方在启动阶段完成。
    /// `trigger` 收到信号时立即重载并重新开始计时。
    pub async fn run(
        &self,
        mut shutdown: watch::Receiver<bool>,
        mut trigger: Option<mpsc::Receiver<()>>,
    ) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.interval.as_secs(),
            watch = trigger.is_some(),
            "规则重载循环已启动"
        );

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    debug!("定时重载规则");
                    self.reload().await;
                }
                signal = next_trigger(&mut trigger) => {
                    match signal {
                        Some(()) => {
                            info!("规则目录变化，重新加载规则");
                            self.reload().await;
                            ticker.reset();
                        }
                        None => {
                            warn!("规则目录监听已断开，仅保留定时重载");
                            trigger = None;
                        }
                    }
                }
            }
        }

        info!("规则重载循环已停止");
    }
}

async fn next_trigger(trigger: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match trigger {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
