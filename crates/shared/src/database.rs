//! PostgreSQL 连接池
//!
//! 服务与数据库常常同时启动，建立连接池时对连接被拒、超时等故障按重试策略退避。

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::config::DatabaseConfig;
use crate::error::{BonusError, Result};
use crate::retry::{RetryPolicy, retry_with_policy};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 建立连接池，按 `retry` 重试可恢复的连接错误
    #[instrument(skip(config, retry))]
    pub async fn connect(config: &DatabaseConfig, retry: &RetryPolicy) -> Result<Self> {
        info!(
            max_connections = config.max_connections,
            "Connecting to database..."
        );

        let options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds));

        let pool = retry_with_policy(retry, "connect_database", BonusError::is_retryable, || {
            let options = options.clone();
            async move { options.connect(&config.url).await.map_err(BonusError::from) }
        })
        .await?;

        info!("Database connection pool created");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 在 `limit` 内关闭连接池
    ///
    /// `PgPool::close` 会等所有借出的连接归还；超时返回 false，连接留给进程退出时回收。
    pub async fn close_within(&self, limit: Duration) -> bool {
        match tokio::time::timeout(limit, self.pool.close()).await {
            Ok(()) => {
                info!("Database connection pool closed");
                true
            }
            Err(_) => {
                warn!(
                    limit_ms = limit.as_millis() as u64,
                    in_use = (self.pool.size() as usize).saturating_sub(self.pool.num_idle()),
                    "Database connection pool did not close in time"
                );
                false
            }
        }
    }

    /// 应用迁移
    ///
    /// `migrate!` 在编译期嵌入迁移目录，由持有 migrations 目录的服务传入 Migrator
    pub async fn run_migrations(&self, migrator: &Migrator) -> Result<()> {
        migrator.run(&self.pool).await?;
        info!(migrations = migrator.iter().count(), "Database migrations applied");
        Ok(())
    }
}
