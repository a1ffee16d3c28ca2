//! 订单对账编排
//!
//! OrderManager 负责：
//! - 校验并登记新订单，为其启动对账 worker
//! - 启动时接管所有未到终态的订单，并按配置周期性重新扫描
//! - 保证同一订单同一时刻只有一个 worker
//! - 根取消信号触发后，在宽限期内等待 worker 退出

use std::sync::Arc;
use std::time::Duration;

use bonus_shared::error::BonusError;
use bonus_shared::observability::metrics;
use bonus_shared::retry::{RetryPolicy, retry_with_policy};
use dashmap::DashSet;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::{AccrualError, Result};
use crate::models::{AddOrderOutcome, Order, PendingOrder};
use crate::validation::is_valid_order_number;
use crate::worker::{ReconciliationWorker, WorkerContext, WorkerExit};

/// 登记结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// 新订单已保存，对账 worker 已启动
    Accepted,
    /// 同一用户重复上传，不做任何处理
    AlreadyRegistered,
}

/// 编排参数
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// 周期性扫描待处理订单的间隔，None 表示只在启动时扫描
    pub rescan_interval: Option<Duration>,
    /// 取消后等待 worker 退出的最长时间
    pub grace_period: Duration,
    /// 启动时读取待处理订单的重试策略
    pub startup_retry: RetryPolicy,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            rescan_interval: Some(Duration::from_secs(60)),
            grace_period: Duration::from_secs(30),
            startup_retry: RetryPolicy::default(),
        }
    }
}

/// 订单对账编排器
pub struct OrderManager {
    ctx: WorkerContext,
    settings: ManagerSettings,
    cancel: CancellationToken,
    tracker: TaskTracker,
    /// 当前有 worker 在运行的订单号
    active: Arc<DashSet<String>>,
}

/// worker 退出时把订单号移出活跃集合
struct ActiveGuard {
    active: Arc<DashSet<String>>,
    number: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.remove(&self.number);
        metrics::set_active_workers(self.active.len());
    }
}

impl OrderManager {
    /// `cancel` 是根取消信号，所有 worker 共享
    pub fn new(ctx: WorkerContext, settings: ManagerSettings, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            settings,
            cancel,
            tracker: TaskTracker::new(),
            active: Arc::new(DashSet::new()),
        }
    }

    /// 登记用户上传的订单号
    ///
    /// 只有格式错误和归属冲突会返回错误；登记成功后对账在后台进行。
    pub async fn register(&self, user_id: i64, raw_number: &str) -> Result<RegisterOutcome> {
        let number = raw_number.trim();
        if !is_valid_order_number(number) {
            return Err(AccrualError::InvalidOrderNumber {
                number: raw_number.to_string(),
            });
        }

        let order = Order::new(number, user_id);
        match self.ctx.orders.add_order(user_id, &order).await? {
            AddOrderOutcome::Created => {
                info!(order_number = number, user_id, "订单已登记");
                self.spawn_worker(PendingOrder::from(&order));
                Ok(RegisterOutcome::Accepted)
            }
            AddOrderOutcome::AlreadyExists { owner } if owner == user_id => {
                debug!(order_number = number, user_id, "订单已由该用户登记");
                Ok(RegisterOutcome::AlreadyRegistered)
            }
            AddOrderOutcome::AlreadyExists { owner } => {
                warn!(order_number = number, user_id, owner, "订单已被其他用户登记");
                Err(AccrualError::OrderOwnedByAnotherUser {
                    number: number.to_string(),
                })
            }
        }
    }

    /// 用户的全部订单
    pub async fn get(&self, user_id: i64) -> Result<Vec<Order>> {
        Ok(self.ctx.orders.list_orders(user_id).await?)
    }

    /// 为所有未到终态且没有 worker 的订单启动 worker，返回新启动的数量
    pub async fn rescan_pending(&self) -> Result<usize> {
        let pending = self.ctx.orders.list_pending_orders().await?;
        Ok(self.spawn_all(pending))
    }

    /// 接管待处理订单并阻塞到根取消信号触发
    ///
    /// 返回前等待所有 worker 退出；超过宽限期返回 `ShutdownTimedOut`。
    pub async fn start(&self) -> Result<()> {
        let pending = retry_with_policy(
            &self.settings.startup_retry,
            "list_pending_orders",
            BonusError::is_retryable,
            || self.ctx.orders.list_pending_orders(),
        )
        .await?;

        let total = pending.len();
        let spawned = self.spawn_all(pending);
        info!(pending = total, spawned, "已接管待处理订单");

        let mut ticker = self.settings.rescan_interval.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = next_tick(&mut ticker) => {
                    match self.rescan_pending().await {
                        Ok(0) => {}
                        Ok(spawned) => info!(spawned, "周期扫描接管了新的待处理订单"),
                        Err(e) => warn!(error = %e, "周期扫描待处理订单失败"),
                    }
                }
            }
        }

        self.shutdown().await
    }

    /// 当前运行中的 worker 数量
    pub fn active_workers(&self) -> usize {
        self.active.len()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn spawn_all(&self, pending: Vec<PendingOrder>) -> usize {
        let mut spawned = 0;
        for order in pending {
            if self.spawn_worker(order) {
                spawned += 1;
            }
        }
        spawned
    }

    /// 启动 worker；该订单已有 worker 时返回 false
    fn spawn_worker(&self, order: PendingOrder) -> bool {
        if !self.active.insert(order.number.clone()) {
            debug!(order_number = %order.number, "订单已有运行中的 worker");
            return false;
        }

        let guard = ActiveGuard {
            active: self.active.clone(),
            number: order.number.clone(),
        };
        metrics::set_active_workers(self.active.len());

        let number = order.number.clone();
        let worker = ReconciliationWorker::new(self.ctx.clone(), order);
        let cancel = self.cancel.clone();

        self.tracker.spawn(async move {
            let _guard = guard;
            match worker.run(cancel).await {
                WorkerExit::Finalized(status) => {
                    debug!(order_number = %number, status = %status, "对账 worker 已完成");
                }
                WorkerExit::Cancelled => debug!(order_number = %number, "对账 worker 已取消"),
                WorkerExit::PersistenceFailed => {
                    warn!(order_number = %number, "对账 worker 因持久化失败退出，等待重新扫描");
                }
            }
        });

        true
    }

    async fn shutdown(&self) -> Result<()> {
        self.tracker.close();
        info!(remaining = self.tracker.len(), "Waiting for reconciliation workers to stop...");

        match tokio::time::timeout(self.settings.grace_period, self.tracker.wait()).await {
            Ok(()) => {
                info!("All reconciliation workers stopped");
                Ok(())
            }
            Err(_) => {
                let remaining = self.tracker.len();
                error!(
                    remaining,
                    grace_secs = self.settings.grace_period.as_secs(),
                    "对账 worker 未在宽限期内退出"
                );
                Err(AccrualError::ShutdownTimedOut {
                    remaining,
                    grace_secs: self.settings.grace_period.as_secs(),
                })
            }
        }
    }
}

/// 未配置周期扫描时永远不会就绪
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderStatus, OrderUpdate};
    use crate::rate_limiter::AdaptiveRateLimiter;
    use crate::repository::{
        BalanceLedgerTrait, MemoryLedgerRepository, MemoryOrderRepository, OrderRepositoryTrait,
    };
    use crate::testing::{ScriptedAccrualClient, Step};
    use async_trait::async_trait;

    const ORDER: &str = "79927398713";
    const OTHER_ORDER: &str = "12345678903";

    struct Harness {
        orders: Arc<MemoryOrderRepository>,
        ledger: Arc<MemoryLedgerRepository>,
        client: Arc<ScriptedAccrualClient>,
        manager: Arc<OrderManager>,
    }

    fn harness(client: ScriptedAccrualClient, settings: ManagerSettings) -> Harness {
        let orders = Arc::new(MemoryOrderRepository::new());
        let ledger = Arc::new(MemoryLedgerRepository::new());
        let client = Arc::new(client);
        let ctx = WorkerContext {
            orders: orders.clone(),
            ledger: ledger.clone(),
            client: client.clone(),
            limiter: Arc::new(AdaptiveRateLimiter::unlimited()),
            poll_interval: Duration::from_secs(1),
        };

        Harness {
            orders,
            ledger,
            client,
            manager: Arc::new(OrderManager::new(ctx, settings, CancellationToken::new())),
        }
    }

    fn no_rescan() -> ManagerSettings {
        ManagerSettings {
            rescan_interval: None,
            grace_period: Duration::from_secs(5),
            startup_retry: RetryPolicy::default(),
        }
    }

    async fn wait_until_idle(manager: &OrderManager) {
        while manager.active_workers() > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_rejects_invalid_number() {
        let h = harness(ScriptedAccrualClient::new(), no_rescan());

        let result = h.manager.register(1, "4561261212345464").await;

        assert!(matches!(result, Err(AccrualError::InvalidOrderNumber { .. })));
        assert_eq!(h.orders.count(), 0);
        assert_eq!(h.manager.active_workers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_twice_by_same_owner() {
        let client = ScriptedAccrualClient::new()
            .script(ORDER, vec![Step::Status(OrderStatus::Processed, Some(500.0))]);
        let h = harness(client, no_rescan());

        assert_eq!(h.manager.register(1, ORDER).await.unwrap(), RegisterOutcome::Accepted);
        assert_eq!(
            h.manager.register(1, &format!(" {ORDER} ")).await.unwrap(),
            RegisterOutcome::AlreadyRegistered
        );

        wait_until_idle(&h.manager).await;
        assert_eq!(h.orders.count(), 1);
        assert_eq!(h.client.calls(ORDER), 1);
        assert_eq!(h.ledger.credit_count(), 1);
        assert_eq!(h.orders.get(ORDER).unwrap().status, OrderStatus::Processed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_conflict_with_other_owner() {
        let client = ScriptedAccrualClient::new()
            .script(ORDER, vec![Step::Status(OrderStatus::Processing, None)]);
        let h = harness(client, no_rescan());

        h.manager.register(1, ORDER).await.unwrap();
        let before = h.orders.get(ORDER).unwrap();

        let result = h.manager.register(2, ORDER).await;
        assert!(matches!(result, Err(AccrualError::OrderOwnedByAnotherUser { .. })));

        let after = h.orders.get(ORDER).unwrap();
        assert_eq!(after.user_id, 1);
        assert_eq!(after.uploaded_at, before.uploaded_at);
        assert_eq!(h.manager.active_workers(), 1);
        assert!(h.manager.get(2).await.unwrap().is_empty());

        h.manager.cancellation_token().cancel();
        wait_until_idle(&h.manager).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_resumes_pending_orders_without_double_credit() {
        let client = ScriptedAccrualClient::new()
            .script(ORDER, vec![Step::Status(OrderStatus::Processed, Some(500.0))])
            .script(OTHER_ORDER, vec![
                Step::Status(OrderStatus::Processing, None),
                Step::Status(OrderStatus::Invalid, None),
            ]);
        let h = harness(client, no_rescan());

        // 重启前：ORDER 已入账但状态仍为 NEW
        h.orders.add_order(1, &Order::new(ORDER, 1)).await.unwrap();
        h.orders.add_order(2, &Order::new(OTHER_ORDER, 2)).await.unwrap();
        h.ledger.credit(1, 500.0, ORDER).await.unwrap();

        let manager = h.manager.clone();
        let running = tokio::spawn(async move { manager.start().await });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.manager.active_workers(), 0);

        h.manager.cancellation_token().cancel();
        running.await.unwrap().unwrap();

        assert_eq!(h.orders.get(ORDER).unwrap().status, OrderStatus::Processed);
        assert_eq!(h.orders.get(OTHER_ORDER).unwrap().status, OrderStatus::Invalid);
        assert_eq!(h.ledger.credit_count(), 1);
        assert_eq!(h.ledger.get_balance(1).await.unwrap().current, 500.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescan_never_duplicates_live_workers() {
        let client = ScriptedAccrualClient::new()
            .script(ORDER, vec![Step::Status(OrderStatus::Processing, None)]);
        let h = harness(client, no_rescan());
        h.orders.add_order(1, &Order::new(ORDER, 1)).await.unwrap();

        assert_eq!(h.manager.rescan_pending().await.unwrap(), 1);
        assert_eq!(h.manager.rescan_pending().await.unwrap(), 0);
        assert_eq!(h.manager.register(1, ORDER).await.unwrap(), RegisterOutcome::AlreadyRegistered);
        assert_eq!(h.manager.active_workers(), 1);

        // 等 worker 完成首次查询并写回 PROCESSING
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(h.orders.get(ORDER).unwrap().status, OrderStatus::Processing);
        assert_eq!(h.manager.active_workers(), 1);

        h.manager.cancellation_token().cancel();
        wait_until_idle(&h.manager).await;
        assert_eq!(h.orders.get(ORDER).unwrap().status, OrderStatus::Processing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_rescan_picks_up_orders() {
        let client = ScriptedAccrualClient::new()
            .script(ORDER, vec![Step::Status(OrderStatus::Processed, Some(10.0))]);
        let settings = ManagerSettings {
            rescan_interval: Some(Duration::from_secs(30)),
            ..no_rescan()
        };
        let h = harness(client, settings);

        let manager = h.manager.clone();
        let running = tokio::spawn(async move { manager.start().await });
        tokio::time::sleep(Duration::from_secs(1)).await;

        // 模拟此前因持久化失败而退出的 worker 留下的订单
        h.orders.add_order(1, &Order::new(ORDER, 1)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.orders.get(ORDER).unwrap().status, OrderStatus::New);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(h.orders.get(ORDER).unwrap().status, OrderStatus::Processed);

        h.manager.cancellation_token().cancel();
        running.await.unwrap().unwrap();
    }

    /// 终态写入永远挂起的订单仓储
    struct StalledOrders(MemoryOrderRepository);

    #[async_trait]
    impl OrderRepositoryTrait for StalledOrders {
        async fn add_order(
            &self,
            user_id: i64,
            order: &Order,
        ) -> bonus_shared::error::Result<AddOrderOutcome> {
            self.0.add_order(user_id, order).await
        }

        async fn update_order(&self, _update: &OrderUpdate) -> bonus_shared::error::Result<()> {
            std::future::pending().await
        }

        async fn list_orders(&self, user_id: i64) -> bonus_shared::error::Result<Vec<Order>> {
            self.0.list_orders(user_id).await
        }

        async fn list_pending_orders(&self) -> bonus_shared::error::Result<Vec<PendingOrder>> {
            self.0.list_pending_orders().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_times_out_on_stuck_worker() {
        let ledger: Arc<dyn BalanceLedgerTrait> = Arc::new(MemoryLedgerRepository::new());
        let ctx = WorkerContext {
            orders: Arc::new(StalledOrders(MemoryOrderRepository::new())),
            ledger,
            client: Arc::new(
                ScriptedAccrualClient::new()
                    .script(ORDER, vec![Step::Status(OrderStatus::Invalid, None)]),
            ),
            limiter: Arc::new(AdaptiveRateLimiter::unlimited()),
            poll_interval: Duration::from_secs(1),
        };
        let manager = Arc::new(OrderManager::new(ctx, no_rescan(), CancellationToken::new()));

        let running = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.start().await })
        };
        manager.register(1, ORDER).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        manager.cancellation_token().cancel();
        let result = running.await.unwrap();

        assert!(matches!(
            result,
            Err(AccrualError::ShutdownTimedOut {
                remaining: 1,
                grace_secs: 5
            })
        ));
    }
}
