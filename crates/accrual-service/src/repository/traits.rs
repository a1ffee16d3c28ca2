//! 仓储 Trait 定义
//!
//! 对账引擎只依赖这两个接口，PostgreSQL 与内存实现可互换，测试中可用 mock 注入故障。

use async_trait::async_trait;
use bonus_shared::error::Result;

use crate::models::{
    AddOrderOutcome, Balance, CreditOutcome, Order, OrderUpdate, PendingOrder, WithdrawOutcome,
    Withdrawal,
};

/// 订单仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepositoryTrait: Send + Sync {
    /// 保存新订单；订单号已存在时返回现有订单的所属用户，不做任何修改
    async fn add_order(&self, user_id: i64, order: &Order) -> Result<AddOrderOutcome>;

    /// 更新订单状态与积分
    ///
    /// 已到达终态的订单保持不变，调用仍视为成功。
    async fn update_order(&self, update: &OrderUpdate) -> Result<()>;

    /// 用户上传的全部订单，按上传时间倒序
    async fn list_orders(&self, user_id: i64) -> Result<Vec<Order>>;

    /// 所有处于 NEW 或 PROCESSING 的订单
    async fn list_pending_orders(&self) -> Result<Vec<PendingOrder>>;
}

/// 积分账本仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BalanceLedgerTrait: Send + Sync {
    /// 按订单入账，同一订单号最多生效一次
    async fn credit(&self, user_id: i64, amount: f64, order_number: &str) -> Result<CreditOutcome>;

    async fn get_balance(&self, user_id: i64) -> Result<Balance>;

    /// 提现；订单号已用于提现时返回 `BonusError::AlreadyExists`
    async fn withdraw(&self, user_id: i64, order_number: &str, sum: f64)
    -> Result<WithdrawOutcome>;

    /// 用户的提现记录，按处理时间倒序
    async fn list_withdrawals(&self, user_id: i64) -> Result<Vec<Withdrawal>>;
}
