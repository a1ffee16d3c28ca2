//! 命令执行器

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::quota::QuotaWindow;
use crate::services::{self, AccrualServiceState};

/// 命令执行器
pub struct CommandRunner;

impl CommandRunner {
    pub fn new() -> Self {
        Self
    }

    /// 执行 server 命令
    pub async fn run_server(
        &self,
        port: u16,
        requests_per_minute: Option<u32>,
        default_accrual: f64,
    ) -> Result<()> {
        info!(port, requests_per_minute = ?requests_per_minute, default_accrual, "启动 Mock 积分计算服务");

        let quota = requests_per_minute.map(QuotaWindow::per_minute);
        let state = Arc::new(AccrualServiceState::new(quota, default_accrual));
        let app = services::app(state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await.context("绑定端口失败")?;

        info!("Mock 积分计算服务已启动: http://{}", addr);
        info!("可用端点:");
        info!("  GET /health - 健康检查");
        info!("  GET /api/orders/{{number}} - 查询订单积分");
        info!("  POST /api/orders - 登记订单");
        info!("按 Ctrl+C 停止服务");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("服务器运行失败")?;

        info!(
            served = state.served(),
            throttled = state.throttled(),
            orders = state.orders.count(),
            "Mock 积分计算服务已停止"
        );
        Ok(())
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "安装 CTRL+C 信号处理器失败");
        std::future::pending::<()>().await;
    }
    info!("收到关闭信号，正在停止服务...");
}
