//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 与 `/health`。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

fn describe_metrics(service_name: &str) {
    metrics::describe_counter!(
        "seckill_admissions_total",
        "Total number of admission attempts by outcome"
    );
    metrics::describe_histogram!(
        "seckill_admission_duration_seconds",
        "Admission decision latency in seconds"
    );
    metrics::describe_counter!(
        "seckill_rollbacks_total",
        "Cache reservations restored after a failed queue send"
    );
    metrics::describe_counter!(
        "seckill_consumer_outcomes_total",
        "Order messages handled by outcome"
    );
    metrics::describe_counter!(
        "seckill_compensation_tasks_total",
        "Compensation tasks recorded for exhausted redeliveries"
    );

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
// 业务指标记录
// ============================================================================

/// 记录一次秒杀准入结果（admitted / exhausted / error）
#[inline]
pub fn record_admission(outcome: &str, duration_secs: f64) {
    metrics::counter!("seckill_admissions_total", "outcome" => outcome.to_string()).increment(1);
    metrics::histogram!("seckill_admission_duration_seconds", "outcome" => outcome.to_string())
        .record(duration_secs);
}

/// 记录一次缓存库存回滚（restored / failed）
#[inline]
pub fn record_rollback(outcome: &str) {
    metrics::counter!("seckill_rollbacks_total", "outcome" => outcome.to_string()).increment(1);
}

/// 记录订单消息处理结果（ack / retry_later / dead_letter）
#[inline]
pub fn record_consumer_outcome(outcome: &str) {
    metrics::counter!("seckill_consumer_outcomes_total", "outcome" => outcome.to_string())
        .increment(1);
}

/// 记录补偿任务落库
#[inline]
pub fn record_compensation_task() {
    metrics::counter!("seckill_compensation_tasks_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 未安装 recorder 时记录操作是空操作
        record_admission("admitted", 0.001);
        record_rollback("restored");
        record_consumer_outcome("ack");
        record_compensation_task();
    }
}
