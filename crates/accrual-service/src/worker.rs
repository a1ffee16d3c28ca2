//! 订单对账 Worker
//!
//! 每个未到终态的订单对应一个 worker，循环向积分计算服务查询直到拿到终态：
//! 1. INVALID：更新订单状态后退出
//! 2. PROCESSED：先按订单号入账（账本保证幂等），再更新订单状态后退出
//! 3. NEW / PROCESSING：等待轮询间隔后重试
//! 4. 限流：按返回的配额重新配置共享限流器后立即重试
//!
//! 外部服务故障无限重试；持久化失败记录日志后退出，订单保持未终态，
//! 由下一次待处理订单扫描重新接管。

use std::sync::Arc;
use std::time::Duration;

use bonus_shared::observability::metrics;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{AccrualClient, FetchOutcome, MAX_RETRY_AFTER};
use crate::error::AccrualError;
use crate::models::{OrderStatus, OrderUpdate, PendingOrder};
use crate::rate_limiter::AdaptiveRateLimiter;
use crate::repository::{BalanceLedgerTrait, OrderRepositoryTrait};

/// worker 共享的依赖
///
/// 所有字段都是 Arc，clone 开销很小，每个 worker 持有一份。
#[derive(Clone)]
pub struct WorkerContext {
    pub orders: Arc<dyn OrderRepositoryTrait>,
    pub ledger: Arc<dyn BalanceLedgerTrait>,
    pub client: Arc<dyn AccrualClient>,
    pub limiter: Arc<AdaptiveRateLimiter>,
    /// 非终态结果与外部服务故障后的重试间隔
    pub poll_interval: Duration,
}

/// worker 退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// 订单已持久化为终态
    Finalized(OrderStatus),
    /// 收到取消信号，订单状态未改变
    Cancelled,
    /// 订单仓储或账本不可用，等待下一次扫描
    PersistenceFailed,
}

/// 单个订单的对账 worker
pub struct ReconciliationWorker {
    ctx: WorkerContext,
    order: PendingOrder,
}

impl ReconciliationWorker {
    pub fn new(ctx: WorkerContext, order: PendingOrder) -> Self {
        Self { ctx, order }
    }

    /// 主循环：直到订单到达终态、持久化失败或收到取消信号
    pub async fn run(mut self, cancel: CancellationToken) -> WorkerExit {
        debug!(
            order_number = %self.order.number,
            user_id = self.order.user_id,
            status = %self.order.status,
            "对账 worker 已启动"
        );

        loop {
            if cancel.is_cancelled() {
                return self.cancelled();
            }

            let remote = match self.ctx.client.fetch(&self.order.number, &cancel).await {
                Ok(FetchOutcome::Order(remote)) => remote,
                Ok(FetchOutcome::Throttled(quota)) => {
                    let now = Instant::now();
                    let pause = quota.retry_after.min(MAX_RETRY_AFTER);
                    let pause_until = now.checked_add(pause).unwrap_or(now);
                    self.ctx
                        .limiter
                        .reconfigure(pause_until, quota.requests_per_minute);
                    continue;
                }
                Err(AccrualError::Cancelled) => return self.cancelled(),
                Err(e) => {
                    warn!(
                        order_number = %self.order.number,
                        error = %e,
                        code = e.code(),
                        transient = e.is_transient(),
                        "查询积分计算服务失败，稍后重试"
                    );
                    if !self.pause(&cancel).await {
                        return self.cancelled();
                    }
                    continue;
                }
            };

            match remote.status {
                OrderStatus::New | OrderStatus::Processing => {
                    if remote.status == OrderStatus::Processing
                        && self.order.status == OrderStatus::New
                    {
                        self.mirror_processing().await;
                    }
                    if !self.pause(&cancel).await {
                        return self.cancelled();
                    }
                }
                OrderStatus::Invalid => return self.finalize(OrderStatus::Invalid, None).await,
                OrderStatus::Processed => {
                    return self.finalize(OrderStatus::Processed, remote.accrual).await;
                }
            }
        }
    }

    /// 可被取消的轮询等待，取消时返回 false
    async fn pause(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.ctx.poll_interval) => true,
        }
    }

    /// 外部服务开始计算后同步本地状态，失败不影响轮询
    async fn mirror_processing(&mut self) {
        let update = OrderUpdate {
            number: self.order.number.clone(),
            status: OrderStatus::Processing,
            accrual: None,
        };

        match self.ctx.orders.update_order(&update).await {
            Ok(()) => {
                debug!(order_number = %self.order.number, "订单状态已更新为 PROCESSING");
                self.order.status = OrderStatus::Processing;
            }
            Err(e) => {
                warn!(
                    order_number = %self.order.number,
                    error = %e,
                    "同步 PROCESSING 状态失败，继续轮询"
                );
            }
        }
    }

    /// 持久化终态
    ///
    /// 入账必须先于状态更新：若更新失败，下次扫描仍会看到未终态订单并重新入账，
    /// 而账本按订单号去重。
    async fn finalize(&self, status: OrderStatus, accrual: Option<f64>) -> WorkerExit {
        let number = &self.order.number;
        let user_id = self.order.user_id;

        if status == OrderStatus::Processed {
            let amount = accrual.unwrap_or(0.0);
            if amount > 0.0 {
                match self.ctx.ledger.credit(user_id, amount, number).await {
                    Ok(outcome) => {
                        metrics::record_ledger_credit(outcome.as_str());
                        debug!(order_number = %number, user_id, amount, result = outcome.as_str(), "入账完成");
                    }
                    Err(e) => {
                        error!(order_number = %number, user_id, amount, error = %e, "积分入账失败，等待下次扫描");
                        metrics::record_persistence_failure("credit");
                        return WorkerExit::PersistenceFailed;
                    }
                }
            }
        }

        let update = OrderUpdate {
            number: number.clone(),
            status,
            accrual,
        };

        if let Err(e) = self.ctx.orders.update_order(&update).await {
            error!(order_number = %number, status = %status, error = %e, "订单终态写入失败，等待下次扫描");
            metrics::record_persistence_failure("update_order");
            return WorkerExit::PersistenceFailed;
        }

        metrics::record_order_finalized(status.as_str());
        info!(order_number = %number, user_id, status = %status, accrual = ?accrual, "订单对账完成");
        WorkerExit::Finalized(status)
    }

    fn cancelled(&self) -> WorkerExit {
        debug!(order_number = %self.order.number, "对账 worker 收到取消信号");
        WorkerExit::Cancelled
    }
}
