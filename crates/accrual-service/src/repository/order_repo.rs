//! 订单仓储
//!
//! 订单号是主键，归属关系在插入时确定且不再改变

use async_trait::async_trait;
use bonus_shared::error::{BonusError, Result};
use sqlx::PgPool;
use tracing::debug;

use super::traits::OrderRepositoryTrait;
use crate::models::{AddOrderOutcome, Order, OrderUpdate, PendingOrder};

/// PostgreSQL 订单仓储
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 查询单个订单
    pub async fn get_order(&self, number: &str) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT number, user_id, status, accrual, uploaded_at
            FROM orders
            WHERE number = $1
            "#,
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn owner_of(&self, number: &str) -> Result<Option<i64>> {
        let owner = sqlx::query_scalar::<_, i64>("SELECT user_id FROM orders WHERE number = $1")
            .bind(number)
            .fetch_optional(&self.pool)
            .await?;

        Ok(owner)
    }
}

#[async_trait]
impl OrderRepositoryTrait for OrderRepository {
    async fn add_order(&self, user_id: i64, order: &Order) -> Result<AddOrderOutcome> {
        let inserted = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO orders (number, user_id, status, accrual, uploaded_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (number) DO NOTHING
            RETURNING number
            "#,
        )
        .bind(&order.number)
        .bind(user_id)
        .bind(order.status)
        .bind(order.accrual)
        .bind(order.uploaded_at)
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_some() {
            return Ok(AddOrderOutcome::Created);
        }

        // 冲突行不会被删除，这里查不到只可能是数据被外部清理
        let owner = self
            .owner_of(&order.number)
            .await?
            .ok_or_else(|| BonusError::Internal(format!("订单 {} 插入冲突但查询不到", order.number)))?;

        debug!(order_number = %order.number, owner, "订单号已存在");
        Ok(AddOrderOutcome::AlreadyExists { owner })
    }

    async fn update_order(&self, update: &OrderUpdate) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, accrual = $3
            WHERE number = $1 AND status IN ('NEW', 'PROCESSING')
            "#,
        )
        .bind(&update.number)
        .bind(update.status)
        .bind(update.accrual)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            if self.owner_of(&update.number).await?.is_none() {
                return Err(BonusError::NotFound {
                    entity: "order".to_string(),
                    id: update.number.clone(),
                });
            }
            debug!(order_number = %update.number, "订单已是终态，忽略更新");
        }

        Ok(())
    }

    async fn list_orders(&self, user_id: i64) -> Result<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT number, user_id, status, accrual, uploaded_at
            FROM orders
            WHERE user_id = $1
            ORDER BY uploaded_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    async fn list_pending_orders(&self) -> Result<Vec<PendingOrder>> {
        let orders = sqlx::query_as::<_, PendingOrder>(
            r#"
            SELECT number, user_id, status
            FROM orders
            WHERE status IN ('NEW', 'PROCESSING')
            ORDER BY uploaded_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }
}
