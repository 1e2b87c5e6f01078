//! 奖励评估服务
//!
//! 启动时加载规则，随后运行事件评估循环与规则重载循环，直到收到退出信号。

use std::sync::Arc;

use anyhow::Result;
use reward_shared::config::AppConfig;
use reward_shared::observability;
use reward_worker::{
    EvaluationLoop, EventSource, KafkaEventSource, KafkaRewardSink, RewardSink,
    RuleDirWatcher, RuleReloader, WorkerError,
};
use rule_engine::{DirectoryRuleSource, RuleLoader, RuleRegistry};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "reward-worker";

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    let obs_config = config.observability.clone().with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(environment = %config.environment, "Starting reward-worker...");

    // 首次加载失败直接退出，不以空规则表对外服务
    let source = DirectoryRuleSource::with_suffix(&config.rules.dir, &config.rules.file_suffix);
    let loader = RuleLoader::new(Arc::new(source));
    let reloader = RuleReloader::new(loader, RuleRegistry::new(), config.rules.reload_interval());
    let status = reloader.reload_once()?;
    info!(
        rule_sets = status.rule_set_count,
        rules = status.rule_count,
        events = ?status.event_names,
        "规则初始加载完成"
    );

    let (source, sink) = build_queues(&config)?;
    let evaluation = Arc::new(EvaluationLoop::new(
        reloader.registry().clone(),
        source,
        sink,
        &config.engine,
    ));

    // 两个循环使用各自的 shutdown 信号
    let (reload_shutdown_tx, reload_shutdown_rx) = watch::channel(false);
    let (eval_shutdown_tx, eval_shutdown_rx) = watch::channel(false);

    let (_watcher, trigger) = if config.rules.watch_enabled {
        match RuleDirWatcher::start(
            &config.rules.dir,
            &config.rules.file_suffix,
            config.rules.debounce(),
        ) {
            Ok((watcher, trigger)) => (Some(watcher), Some(trigger)),
            Err(e) => {
                warn!(error = %e, "规则目录监听启动失败，仅使用定时重载");
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    let reload_handle = tokio::spawn({
        let reloader = reloader.clone();
        async move { reloader.run(reload_shutdown_rx, trigger).await }
    });

    let workers = config.engine.workers.max(1);
    let worker_handles: Vec<_> = (0..workers)
        .map(|_| {
            let evaluation = evaluation.clone();
            let shutdown = eval_shutdown_rx.clone();
            tokio::spawn(async move { evaluation.run(shutdown).await })
        })
        .collect();
    info!(workers, "事件评估 worker 已启动");

    shutdown_signal().await;

    let _ = eval_shutdown_tx.send(true);
    let mut processed = 0u64;
    for handle in worker_handles {
        match handle.await {
            Ok(count) => processed += count,
            Err(e) => error!(error = %e, "评估 worker 异常退出"),
        }
    }

    let _ = reload_shutdown_tx.send(true);
    if let Err(e) = reload_handle.await {
        error!(error = %e, "规则重载任务异常退出");
    }

    info!(processed, "Service shutdown complete");
    Ok(())
}

/// 创建 Kafka 事件来源与奖励投递目标
fn build_queues(
    config: &AppConfig,
) -> Result<(Arc<dyn EventSource>, Arc<dyn RewardSink>), WorkerError> {
    let source = KafkaEventSource::new(&config.kafka, &config.engine.event_topic)?;
    let sink = KafkaRewardSink::new(&config.kafka)?;
    Ok((Arc::new(source), Arc::new(sink)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
