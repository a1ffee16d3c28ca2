//! Mock 服务模块
//!
//! 提供模拟的积分计算服务 REST API，用于开发环境和集成测试。

pub mod accrual_service;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, routing::get};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::error;

pub use accrual_service::{AccrualServiceState, accrual_routes};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// 健康检查端点
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

/// 组装完整应用：健康检查 + 积分计算服务
pub fn app(state: Arc<AccrualServiceState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(accrual_routes().with_state(state))
}

/// 在后台任务中启动服务，返回实际监听地址
///
/// 传入端口 0 时由系统分配，集成测试借此并行启动多个实例。
pub async fn spawn_server(
    state: Arc<AccrualServiceState>,
    addr: SocketAddr,
) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app(state)).await {
            error!(error = %e, "Mock 积分计算服务异常退出");
        }
    });

    Ok((local_addr, handle))
}
