//! 基础设施错误
//!
//! 订单仓储与积分账本共用的错误类型。业务服务在此之上定义各自的错误枚举，
//! 通过 `#[from]` 透传。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BonusError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库迁移失败: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    /// 唯一约束冲突（如同一订单号重复提现）
    #[error("记录已存在: {entity} {field}={value}")]
    AlreadyExists {
        entity: String,
        field: String,
        value: String,
    },

    /// 存储层状态与预期不符
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BonusError>;

impl BonusError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Migration(_) => "MIGRATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 连接层面的故障（数据库尚未就绪、连接池耗尽、连接中断）可以重试；
    /// SQL 本身出错、约束冲突等重试也不会成功
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}
