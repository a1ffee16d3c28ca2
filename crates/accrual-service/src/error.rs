//! 积分对账服务错误类型
//!
//! 在共享库 BonusError 基础上定义对账引擎特有的错误变体。
//! 只有格式校验与归属冲突会同步返回给订单上传方，
//! 其余情况（外部服务故障、持久化失败、取消）都在 worker 内部消化。

use bonus_shared::error::BonusError;

/// 对账引擎错误
#[derive(Debug, thiserror::Error)]
pub enum AccrualError {
    /// 订单号不是合法的 Luhn 数字串，不重试
    #[error("订单号格式无效: {number}")]
    InvalidOrderNumber { number: String },

    /// 订单号已被其他用户上传，不重试
    #[error("订单已被其他用户上传: {number}")]
    OrderOwnedByAnotherUser { number: String },

    /// 积分计算服务不可达或返回了非预期状态码，worker 按固定间隔无限重试
    #[error("积分计算服务不可用: {0}")]
    AccrualUnavailable(String),

    /// 积分计算服务的响应无法解析，按瞬时故障处理
    #[error("积分计算服务响应无法解析: {0}")]
    MalformedAccrualResponse(String),

    /// 提现金额非法（非正数或非有限值）
    #[error("金额无效: {0}")]
    InvalidAmount(f64),

    #[error("余额不足: 需要 {required}, 可用 {available}")]
    InsufficientFunds { required: f64, available: f64 },

    /// 根取消信号已触发，调用方应直接退出
    #[error("操作已取消")]
    Cancelled,

    /// 宽限期内仍有 worker 未结束
    #[error("关闭超时: {remaining} 个后台任务在 {grace_secs} 秒内未结束")]
    ShutdownTimedOut { remaining: usize, grace_secs: u64 },

    /// 透传共享库错误（订单存储、余额账本等持久化故障）
    #[error(transparent)]
    Shared(#[from] BonusError),
}

pub type Result<T> = std::result::Result<T, AccrualError>;

impl AccrualError {
    /// 外部服务的瞬时故障，轮询循环会继续重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AccrualUnavailable(_) | Self::MalformedAccrualResponse(_)
        )
    }

    /// 持久化层故障
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Shared(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidOrderNumber { .. } => "INVALID_ORDER_NUMBER",
            Self::OrderOwnedByAnotherUser { .. } => "ORDER_OWNED_BY_ANOTHER_USER",
            Self::AccrualUnavailable(_) => "ACCRUAL_UNAVAILABLE",
            Self::MalformedAccrualResponse(_) => "MALFORMED_ACCRUAL_RESPONSE",
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::Cancelled => "CANCELLED",
            Self::ShutdownTimedOut { .. } => "SHUTDOWN_TIMED_OUT",
            Self::Shared(e) => e.code(),
        }
    }
}

impl From<reqwest::Error> for AccrualError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::MalformedAccrualResponse(err.to_string())
        } else {
            Self::AccrualUnavailable(err.to_string())
        }
    }
}
