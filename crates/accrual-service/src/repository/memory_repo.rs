//! 内存仓储
//!
//! 基于 DashMap 的订单与账本实现，用于本地运行（storage = "memory"）和测试。
//! 单个操作内的原子性依赖 DashMap 的 entry 锁；跨表操作按固定顺序加锁。

use async_trait::async_trait;
use bonus_shared::error::{BonusError, Result};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::traits::{BalanceLedgerTrait, OrderRepositoryTrait};
use crate::models::{
    AddOrderOutcome, Balance, CreditOutcome, Order, OrderUpdate, PendingOrder, WithdrawOutcome,
    Withdrawal,
};

/// 内存订单仓储
#[derive(Debug, Default)]
pub struct MemoryOrderRepository {
    orders: DashMap<String, Order>,
}

impl MemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, number: &str) -> Option<Order> {
        self.orders.get(number).map(|o| o.clone())
    }

    pub fn count(&self) -> usize {
        self.orders.len()
    }
}

#[async_trait]
impl OrderRepositoryTrait for MemoryOrderRepository {
    async fn add_order(&self, user_id: i64, order: &Order) -> Result<AddOrderOutcome> {
        match self.orders.entry(order.number.clone()) {
            Entry::Occupied(existing) => Ok(AddOrderOutcome::AlreadyExists {
                owner: existing.get().user_id,
            }),
            Entry::Vacant(slot) => {
                slot.insert(Order {
                    user_id,
                    ..order.clone()
                });
                Ok(AddOrderOutcome::Created)
            }
        }
    }

    async fn update_order(&self, update: &OrderUpdate) -> Result<()> {
        let mut order = self
            .orders
            .get_mut(&update.number)
            .ok_or_else(|| BonusError::NotFound {
                entity: "order".to_string(),
                id: update.number.clone(),
            })?;

        if !order.status.is_terminal() {
            order.status = update.status;
            order.accrual = update.accrual;
        }

        Ok(())
    }

    async fn list_orders(&self, user_id: i64) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();

        orders.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(orders)
    }

    async fn list_pending_orders(&self) -> Result<Vec<PendingOrder>> {
        let mut pending: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| !entry.status.is_terminal())
            .map(|entry| entry.value().clone())
            .collect();

        pending.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        Ok(pending.iter().map(PendingOrder::from).collect())
    }
}

/// 内存积分账本
///
/// 加锁顺序：入账 credits → balances；提现 balances → withdrawals。
#[derive(Debug, Default)]
pub struct MemoryLedgerRepository {
    credits: DashMap<String, (i64, f64)>,
    balances: DashMap<i64, Balance>,
    withdrawals: DashMap<String, Withdrawal>,
}

impl MemoryLedgerRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订单的入账金额
    pub fn credited_amount(&self, order_number: &str) -> Option<f64> {
        self.credits.get(order_number).map(|c| c.1)
    }

    pub fn credit_count(&self) -> usize {
        self.credits.len()
    }
}

#[async_trait]
impl BalanceLedgerTrait for MemoryLedgerRepository {
    async fn credit(&self, user_id: i64, amount: f64, order_number: &str) -> Result<CreditOutcome> {
        match self.credits.entry(order_number.to_string()) {
            Entry::Occupied(_) => Ok(CreditOutcome::AlreadyApplied),
            Entry::Vacant(slot) => {
                self.balances.entry(user_id).or_default().current += amount;
                slot.insert((user_id, amount));
                Ok(CreditOutcome::Applied)
            }
        }
    }

    async fn get_balance(&self, user_id: i64) -> Result<Balance> {
        Ok(self
            .balances
            .get(&user_id)
            .map(|b| *b)
            .unwrap_or_default())
    }

    async fn withdraw(
        &self,
        user_id: i64,
        order_number: &str,
        sum: f64,
    ) -> Result<WithdrawOutcome> {
        let mut balance = self.balances.entry(user_id).or_default();

        let Entry::Vacant(slot) = self.withdrawals.entry(order_number.to_string()) else {
            return Err(BonusError::AlreadyExists {
                entity: "withdrawal".to_string(),
                field: "order_number".to_string(),
                value: order_number.to_string(),
            });
        };

        if balance.current < sum {
            return Ok(WithdrawOutcome::InsufficientFunds {
                available: balance.current,
            });
        }

        balance.current -= sum;
        balance.withdrawn += sum;
        slot.insert(Withdrawal {
            order_number: order_number.to_string(),
            user_id,
            sum,
            processed_at: Utc::now(),
        });

        Ok(WithdrawOutcome::Completed)
    }

    async fn list_withdrawals(&self, user_id: i64) -> Result<Vec<Withdrawal>> {
        let mut withdrawals: Vec<Withdrawal> = self
            .withdrawals
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();

        withdrawals.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        Ok(withdrawals)
    }
}
