//! 模拟积分计算模型
//!
//! 每个订单登记时附带一段状态脚本，每次查询推进一步，最后一步保持不变，
//! 用于复现"计算中 → 计算完成"的真实时序。

use serde::{Deserialize, Serialize};

/// 外部积分计算服务的订单状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccrualStatus {
    /// 已登记，尚未开始计算
    Registered,
    Processing,
    Invalid,
    Processed,
}

/// 脚本中的一步
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccrualStep {
    pub status: AccrualStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual: Option<f64>,
}

impl AccrualStep {
    pub fn status(status: AccrualStatus) -> Self {
        Self {
            status,
            accrual: None,
        }
    }

    pub fn processed(accrual: f64) -> Self {
        Self {
            status: AccrualStatus::Processed,
            accrual: Some(accrual),
        }
    }
}

/// 单个订单的状态脚本
#[derive(Debug, Clone, PartialEq)]
pub struct AccrualScript {
    /// 至少一步
    steps: Vec<AccrualStep>,
    cursor: usize,
}

impl AccrualScript {
    /// 空脚本视为一直处于 REGISTERED
    pub fn new(mut steps: Vec<AccrualStep>) -> Self {
        if steps.is_empty() {
            steps.push(AccrualStep::status(AccrualStatus::Registered));
        }
        Self { steps, cursor: 0 }
    }

    /// 默认进度：REGISTERED → PROCESSING → PROCESSED
    pub fn standard(accrual: f64) -> Self {
        Self::new(vec![
            AccrualStep::status(AccrualStatus::Registered),
            AccrualStep::status(AccrualStatus::Processing),
            AccrualStep::processed(accrual),
        ])
    }

    /// 返回当前一步并推进，最后一步不会被弹出
    pub fn advance(&mut self) -> AccrualStep {
        let step = self.steps[self.cursor].clone();
        if self.cursor + 1 < self.steps.len() {
            self.cursor += 1;
        }
        step
    }
}

/// 登记订单请求
///
/// POST /api/orders
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegisterOrderRequest {
    pub order: String,
    /// 缺省时使用默认进度
    #[serde(default)]
    pub steps: Option<Vec<AccrualStep>>,
}

/// 订单查询响应
///
/// GET /api/orders/{number}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccrualResponse {
    pub order: String,
    pub status: AccrualStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual: Option<f64>,
}
