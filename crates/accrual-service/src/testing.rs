//! 单元测试辅助：按脚本返回结果的积分计算服务

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::client::{AccrualClient, FetchOutcome, QuotaUpdate};
use crate::error::{AccrualError, Result};
use crate::models::{AccrualOrder, OrderStatus};

#[derive(Debug, Clone)]
pub enum Step {
    Status(OrderStatus, Option<f64>),
    Throttle { retry_after_secs: u64, rpm: u32 },
    Unavailable,
}

/// 每个订单一份脚本，逐次弹出；最后一步保持不变
#[derive(Debug, Default)]
pub struct ScriptedAccrualClient {
    scripts: DashMap<String, VecDeque<Step>>,
    calls: DashMap<String, usize>,
}

impl ScriptedAccrualClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, order_number: &str, steps: Vec<Step>) -> Self {
        self.scripts.insert(order_number.to_string(), steps.into());
        self
    }

    pub fn calls(&self, order_number: &str) -> usize {
        self.calls.get(order_number).map(|c| *c).unwrap_or(0)
    }

    fn next_step(&self, order_number: &str) -> Option<Step> {
        let mut script = self.scripts.get_mut(order_number)?;
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }
}

#[async_trait]
impl AccrualClient for ScriptedAccrualClient {
    async fn fetch(&self, order_number: &str, cancel: &CancellationToken) -> Result<FetchOutcome> {
        if cancel.is_cancelled() {
            return Err(AccrualError::Cancelled);
        }
        *self.calls.entry(order_number.to_string()).or_default() += 1;

        match self.next_step(order_number) {
            Some(Step::Status(status, accrual)) => Ok(FetchOutcome::Order(AccrualOrder {
                order: order_number.to_string(),
                status,
                accrual,
            })),
            Some(Step::Throttle {
                retry_after_secs,
                rpm,
            }) => Ok(FetchOutcome::Throttled(QuotaUpdate {
                retry_after: Duration::from_secs(retry_after_secs),
                requests_per_minute: rpm,
            })),
            Some(Step::Unavailable) | None => Err(AccrualError::AccrualUnavailable(
                "503 Service Unavailable".to_string(),
            )),
        }
    }
}
