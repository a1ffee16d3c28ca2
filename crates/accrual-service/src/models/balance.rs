//! 余额与提现模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 用户积分余额
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Balance {
    /// 当前可用积分
    pub current: f64,
    /// 累计已提现积分
    pub withdrawn: f64,
}

/// 一次积分提现（抵扣）记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Withdrawal {
    /// 抵扣所针对的订单号
    #[serde(rename = "order")]
    pub order_number: String,
    #[serde(skip_serializing)]
    pub user_id: i64,
    pub sum: f64,
    pub processed_at: DateTime<Utc>,
}

/// 入账结果
///
/// 同一订单号最多入账一次，重复调用返回 AlreadyApplied 且不改变余额。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    Applied,
    AlreadyApplied,
}

impl CreditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::AlreadyApplied => "duplicate",
        }
    }
}

/// 提现结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WithdrawOutcome {
    Completed,
    /// 可用余额不足，携带当时的可用余额
    InsufficientFunds { available: f64 },
}
