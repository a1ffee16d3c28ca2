//! 订单领域模型
//!
//! 订单在上传时以 NEW 创建，之后仅由对账 worker 推进到终态（INVALID / PROCESSED）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 订单积分计算状态
///
/// 同时用于数据库存储和积分计算服务的响应解析。
/// 外部服务以 REGISTERED 表示"已登记未计算"，与本地 NEW 等价。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// 已上传，尚未开始计算
    #[default]
    #[serde(alias = "REGISTERED")]
    New,
    /// 外部服务计算中
    Processing,
    /// 外部服务拒绝计算，不产生积分
    Invalid,
    /// 计算完成，积分已确定
    Processed,
}

impl OrderStatus {
    /// 终态一旦到达便不再变化
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Invalid | Self::Processed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Processing => "PROCESSING",
            Self::Invalid => "INVALID",
            Self::Processed => "PROCESSED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 已持久化的订单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    /// 十进制订单号，全局唯一
    pub number: String,
    /// 上传订单的用户，创建后不可变
    #[serde(skip_serializing)]
    pub user_id: i64,
    pub status: OrderStatus,
    /// 仅在 PROCESSED 时存在
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<f64>,
    pub uploaded_at: DateTime<Utc>,
}

impl Order {
    /// 构造一个待计算的新订单
    pub fn new(number: impl Into<String>, user_id: i64) -> Self {
        Self {
            number: number.into(),
            user_id,
            status: OrderStatus::New,
            accrual: None,
            uploaded_at: Utc::now(),
        }
    }
}

/// 尚未到达终态、需要（继续）对账的订单
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PendingOrder {
    pub number: String,
    pub user_id: i64,
    pub status: OrderStatus,
}

impl From<&Order> for PendingOrder {
    fn from(order: &Order) -> Self {
        Self {
            number: order.number.clone(),
            user_id: order.user_id,
            status: order.status,
        }
    }
}

/// 订单状态更新
///
/// worker 只提交状态与积分，订单号之外的字段由存储层保持不变。
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub number: String,
    pub status: OrderStatus,
    pub accrual: Option<f64>,
}

/// 新增订单的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOrderOutcome {
    /// 新建成功
    Created,
    /// 订单号已存在，携带现有订单的所属用户
    AlreadyExists { owner: i64 },
}

/// 积分计算服务返回的订单计算结果
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccrualOrder {
    pub order: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub accrual: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());
        assert!(OrderStatus::Invalid.is_terminal());
        assert!(OrderStatus::Processed.is_terminal());
    }

    #[test]
    fn test_accrual_order_deserialize() {
        let processed: AccrualOrder =
            serde_json::from_str(r#"{"order":"4561261212345467","status":"PROCESSED","accrual":500}"#)
                .unwrap();
        assert_eq!(processed.status, OrderStatus::Processed);
        assert_eq!(processed.accrual, Some(500.0));

        let registered: AccrualOrder =
            serde_json::from_str(r#"{"order":"4561261212345467","status":"REGISTERED"}"#).unwrap();
        assert_eq!(registered.status, OrderStatus::New);
        assert_eq!(registered.accrual, None);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let result =
            serde_json::from_str::<AccrualOrder>(r#"{"order":"1","status":"DONE"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_order_serialization_hides_owner() {
        let order = Order::new("79927398713", 42);
        let json = serde_json::to_value(&order).unwrap();

        assert_eq!(json["number"], "79927398713");
        assert_eq!(json["status"], "NEW");
        assert!(json.get("user_id").is_none());
        assert!(json.get("accrual").is_none());
    }
}
