//! 积分账本仓储
//!
//! 余额快照与入账、提现流水在同一事务中维护，流水表的主键（订单号）保证幂等

use async_trait::async_trait;
use bonus_shared::error::{BonusError, Result};
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};

use super::traits::BalanceLedgerTrait;
use crate::models::{Balance, CreditOutcome, WithdrawOutcome, Withdrawal};

/// PostgreSQL 积分账本
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中锁定用户余额行，不存在时先创建
    async fn lock_balance_in_tx(tx: &mut PgConnection, user_id: i64) -> Result<Balance> {
        sqlx::query(
            r#"
            INSERT INTO user_balances (user_id, current, withdrawn)
            VALUES ($1, 0, 0)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let balance = sqlx::query_as::<_, Balance>(
            r#"
            SELECT current, withdrawn
            FROM user_balances
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        Ok(balance)
    }

    async fn withdrawal_exists_in_tx(tx: &mut PgConnection, order_number: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM withdrawals WHERE order_number = $1)",
        )
        .bind(order_number)
        .fetch_one(tx)
        .await?;

        Ok(exists)
    }
}

fn withdrawal_conflict(order_number: &str) -> BonusError {
    BonusError::AlreadyExists {
        entity: "withdrawal".to_string(),
        field: "order_number".to_string(),
        value: order_number.to_string(),
    }
}

#[async_trait]
impl BalanceLedgerTrait for LedgerRepository {
    async fn credit(&self, user_id: i64, amount: f64, order_number: &str) -> Result<CreditOutcome> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO accrual_credits (order_number, user_id, amount)
            VALUES ($1, $2, $3)
            ON CONFLICT (order_number) DO NOTHING
            "#,
        )
        .bind(order_number)
        .bind(user_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            debug!(order_number, user_id, "订单已入账，跳过");
            return Ok(CreditOutcome::AlreadyApplied);
        }

        sqlx::query(
            r#"
            INSERT INTO user_balances (user_id, current, withdrawn)
            VALUES ($1, $2, 0)
            ON CONFLICT (user_id) DO UPDATE
            SET current = user_balances.current + EXCLUDED.current
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(order_number, user_id, amount, "积分已入账");
        Ok(CreditOutcome::Applied)
    }

    async fn get_balance(&self, user_id: i64) -> Result<Balance> {
        let balance = sqlx::query_as::<_, Balance>(
            "SELECT current, withdrawn FROM user_balances WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(balance.unwrap_or_default())
    }

    async fn withdraw(
        &self,
        user_id: i64,
        order_number: &str,
        sum: f64,
    ) -> Result<WithdrawOutcome> {
        let mut tx = self.pool.begin().await?;

        let balance = Self::lock_balance_in_tx(&mut tx, user_id).await?;

        if Self::withdrawal_exists_in_tx(&mut tx, order_number).await? {
            tx.rollback().await?;
            return Err(withdrawal_conflict(order_number));
        }

        if balance.current < sum {
            tx.rollback().await?;
            return Ok(WithdrawOutcome::InsufficientFunds {
                available: balance.current,
            });
        }

        // 其他用户可能并发使用了同一订单号，冲突时整个事务回滚
        let inserted = sqlx::query(
            r#"
            INSERT INTO withdrawals (order_number, user_id, sum)
            VALUES ($1, $2, $3)
            ON CONFLICT (order_number) DO NOTHING
            "#,
        )
        .bind(order_number)
        .bind(user_id)
        .bind(sum)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(withdrawal_conflict(order_number));
        }

        sqlx::query(
            r#"
            UPDATE user_balances
            SET current = current - $2, withdrawn = withdrawn + $2
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(sum)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(order_number, user_id, sum, "积分提现完成");
        Ok(WithdrawOutcome::Completed)
    }

    async fn list_withdrawals(&self, user_id: i64) -> Result<Vec<Withdrawal>> {
        let withdrawals = sqlx::query_as::<_, Withdrawal>(
            r#"
            SELECT order_number, user_id, sum, processed_at
            FROM withdrawals
            WHERE user_id = $1
            ORDER BY processed_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(withdrawals)
    }
}
