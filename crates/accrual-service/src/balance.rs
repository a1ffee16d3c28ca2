//! 积分余额与提现
//!
//! 提现（用积分抵扣新订单）前校验订单号与金额，余额检查与扣减由账本在单个事务内完成。

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{AccrualError, Result};
use crate::models::{Balance, WithdrawOutcome, Withdrawal};
use crate::repository::BalanceLedgerTrait;
use crate::validation::is_valid_order_number;

/// 余额服务
pub struct BalanceManager {
    ledger: Arc<dyn BalanceLedgerTrait>,
}

impl BalanceManager {
    pub fn new(ledger: Arc<dyn BalanceLedgerTrait>) -> Self {
        Self { ledger }
    }

    pub async fn get_balance(&self, user_id: i64) -> Result<Balance> {
        Ok(self.ledger.get_balance(user_id).await?)
    }

    /// 提现
    ///
    /// 订单号重复使用时返回 `BonusError::AlreadyExists`（经 `AccrualError::Shared` 透传）。
    pub async fn withdraw(&self, user_id: i64, raw_number: &str, sum: f64) -> Result<()> {
        let number = raw_number.trim();
        if !is_valid_order_number(number) {
            return Err(AccrualError::InvalidOrderNumber {
                number: raw_number.to_string(),
            });
        }
        if !sum.is_finite() || sum <= 0.0 {
            return Err(AccrualError::InvalidAmount(sum));
        }

        match self.ledger.withdraw(user_id, number, sum).await? {
            WithdrawOutcome::Completed => {
                info!(user_id, order_number = number, sum, "提现成功");
                Ok(())
            }
            WithdrawOutcome::InsufficientFunds { available } => {
                warn!(user_id, order_number = number, sum, available, "余额不足，提现被拒绝");
                Err(AccrualError::InsufficientFunds {
                    required: sum,
                    available,
                })
            }
        }
    }

    pub async fn list_withdrawals(&self, user_id: i64) -> Result<Vec<Withdrawal>> {
        Ok(self.ledger.list_withdrawals(user_id).await?)
    }
}
