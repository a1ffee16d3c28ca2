//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。
//! 未安装 recorder 时，所有 record_* 函数都是空操作。

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
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 与 `/health` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册对账引擎的指标描述（出现在 /metrics 的 HELP 注释中）
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "accrual_requests_total",
        "Requests sent to the accrual service, by outcome"
    );
    metrics::describe_counter!(
        "accrual_throttles_total",
        "Throttling responses (HTTP 429) received from the accrual service"
    );
    metrics::describe_gauge!(
        "accrual_quota_requests_per_minute",
        "Request quota most recently advertised by the accrual service"
    );
    metrics::describe_counter!(
        "orders_finalized_total",
        "Orders driven to a terminal status, by status"
    );
    metrics::describe_counter!("ledger_credits_total", "Balance credit attempts, by result");
    metrics::describe_counter!(
        "worker_persistence_failures_total",
        "Reconciliation workers stopped by a persistence failure"
    );
    metrics::describe_gauge!(
        "reconciliation_workers_active",
        "Reconciliation workers currently running"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
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
// 指标记录函数
// ============================================================================

/// 记录一次对积分计算服务的请求结果（ok / throttled / error）
#[inline]
pub fn record_accrual_request(outcome: &str) {
    metrics::counter!("accrual_requests_total", "outcome" => outcome.to_string()).increment(1);
}

/// 记录一次限流响应及其公布的新配额
#[inline]
pub fn record_accrual_throttle(requests_per_minute: u32) {
    metrics::counter!("accrual_throttles_total").increment(1);
    metrics::gauge!("accrual_quota_requests_per_minute").set(requests_per_minute as f64);
}

/// 记录订单进入终态
#[inline]
pub fn record_order_finalized(status: &str) {
    metrics::counter!("orders_finalized_total", "status" => status.to_string()).increment(1);
}

/// 记录余额入账结果（applied / duplicate）
#[inline]
pub fn record_ledger_credit(result: &str) {
    metrics::counter!("ledger_credits_total", "result" => result.to_string()).increment(1);
}

/// 记录 worker 因持久化失败退出
#[inline]
pub fn record_persistence_failure(operation: &str) {
    metrics::counter!(
        "worker_persistence_failures_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// 更新存活 worker 数
#[inline]
pub fn set_active_workers(count: usize) {
    metrics::gauge!("reconciliation_workers_active").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_accrual_request("ok");
        record_accrual_throttle(10);
        record_order_finalized("PROCESSED");
        record_ledger_credit("applied");
        record_persistence_failure("update_order");
        set_active_workers(3);
    }
}
