//! 积分订单对账服务入口
//!
//! 加载配置，初始化存储与可观测性，接管待处理订单，直到收到停止信号。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bonus_shared::{
    config::{AppConfig, StorageBackend},
    database::Database,
    observability,
    retry::RetryPolicy,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use accrual_service::{
    MIGRATOR,
    client::HttpAccrualClient,
    error::AccrualError,
    manager::{ManagerSettings, OrderManager},
    rate_limiter::AdaptiveRateLimiter,
    repository::{
        BalanceLedgerTrait, LedgerRepository, MemoryLedgerRepository, MemoryOrderRepository,
        OrderRepository, OrderRepositoryTrait,
    },
    worker::WorkerContext,
};

/// 连接池关闭的最长等待时间
const POOL_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置
    let config = AppConfig::load("accrual-service").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        AppConfig::default()
    });

    // 2. 初始化日志与指标
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting accrual-service...");
    info!(
        environment = %config.environment,
        storage = ?config.storage,
        accrual_base_url = %config.accrual.base_url,
        "Configuration loaded"
    );

    // 3. 初始化存储
    let (orders, ledger, db): (
        Arc<dyn OrderRepositoryTrait>,
        Arc<dyn BalanceLedgerTrait>,
        Option<Database>,
    ) = match config.storage {
        StorageBackend::Postgres => {
            let db = Database::connect(&config.database, &RetryPolicy::default()).await?;
            db.run_migrations(&MIGRATOR).await?;
            info!("Database connection established");

            let pool = db.pool().clone();
            let orders: Arc<dyn OrderRepositoryTrait> = Arc::new(OrderRepository::new(pool.clone()));
            let ledger: Arc<dyn BalanceLedgerTrait> = Arc::new(LedgerRepository::new(pool));
            (orders, ledger, Some(db))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage, data will be lost on restart");
            let orders: Arc<dyn OrderRepositoryTrait> = Arc::new(MemoryOrderRepository::new());
            let ledger: Arc<dyn BalanceLedgerTrait> = Arc::new(MemoryLedgerRepository::new());
            (orders, ledger, None)
        }
    };

    // 4. 限流器与积分计算服务客户端
    let limiter = Arc::new(AdaptiveRateLimiter::from_config(
        config.accrual.initial_requests_per_minute,
    ));
    let client = Arc::new(HttpAccrualClient::new(
        &config.accrual.base_url,
        config.accrual.request_timeout(),
        limiter.clone(),
    )?);

    // 5. 对账编排
    let ctx = WorkerContext {
        orders,
        ledger,
        client,
        limiter,
        poll_interval: config.accrual.poll_interval(),
    };
    let settings = ManagerSettings {
        rescan_interval: config.accrual.rescan_interval(),
        grace_period: config.shutdown.grace_period(),
        startup_retry: RetryPolicy::default(),
    };
    let cancel = CancellationToken::new();
    let manager = OrderManager::new(ctx, settings, cancel.clone());

    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    let result = manager.start().await;

    if let Some(db) = db {
        if should_drain_pool(&result) {
            db.close_within(POOL_CLOSE_TIMEOUT).await;
        } else {
            warn!("Skipping database pool close, stalled workers still hold connections");
        }
    }

    match result {
        Ok(()) => {
            info!("Service shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, code = e.code(), "Service stopped with error");
            Err(e.into())
        }
    }
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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

/// 宽限期超时说明仍有 worker 持有连接，此时等待连接池关闭只会卡住进程
fn should_drain_pool(result: &Result<(), AccrualError>) -> bool {
    !matches!(result, Err(AccrualError::ShutdownTimedOut { .. }))
}
