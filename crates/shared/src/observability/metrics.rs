//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。
//! 只记录聚合指标，不按规则 ID 打标签。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册通用指标描述，会出现在 /metrics 端点的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "reward_events_total",
        "Total number of evaluated events by outcome"
    );
    metrics::describe_counter!(
        "reward_decode_failures_total",
        "Total number of queued messages that failed to decode"
    );
    metrics::describe_counter!(
        "reward_sink_failures_total",
        "Total number of rewards that failed to enqueue"
    );
    metrics::describe_counter!("rule_reloads_total", "Total number of rule reloads by result");
    metrics::describe_gauge!("rule_sets_loaded", "Number of rule sets currently published");

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次事件评估结果（rewarded / no_match / no_rule_set）
#[inline]
pub fn record_event_outcome(outcome: &'static str) {
    metrics::counter!("reward_events_total", "outcome" => outcome).increment(1);
}

#[inline]
pub fn record_decode_failure() {
    metrics::counter!("reward_decode_failures_total").increment(1);
}

#[inline]
pub fn record_sink_failure() {
    metrics::counter!("reward_sink_failures_total").increment(1);
}

/// 记录一次规则重载，成功时同时更新已发布规则集数量
#[inline]
pub fn record_rule_reload(success: bool, rule_sets: Option<usize>) {
    let result = if success { "success" } else { "failure" };
    metrics::counter!("rule_reloads_total", "result" => result).increment(1);
    if let Some(count) = rule_sets {
        metrics::gauge!("rule_sets_loaded").set(count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_without_recorder() {
        // 未安装 recorder 时记录指标应为空操作
        record_event_outcome("rewarded");
        record_event_outcome("no_match");
        record_decode_failure();
        record_sink_failure();
        record_rule_reload(true, Some(3));
        record_rule_reload(false, None);
    }
}
