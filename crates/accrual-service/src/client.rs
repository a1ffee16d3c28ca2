//! 积分计算服务 HTTP 客户端
//!
//! 通过 AccrualClient trait 抽象外部调用，便于测试时注入脚本化的 mock 实现。
//! 每次请求前先经过共享限流器取得令牌；限流响应（429）不是错误，
//! 而是以 `FetchOutcome::Throttled` 返回，由调用方据此调整限流器。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bonus_shared::observability::metrics;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{AccrualError, Result};
use crate::models::AccrualOrder;
use crate::rate_limiter::AdaptiveRateLimiter;

const QUOTA_BODY_PREFIX: &str = "No more than ";
const QUOTA_BODY_SUFFIX: &str = " requests per minute allowed";

/// Retry-After 的上限，超过视为畸形响应
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

// ---------------------------------------------------------------------------
// Trait 抽象
// ---------------------------------------------------------------------------

/// 外部服务在 429 响应中公布的新配额
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaUpdate {
    /// Retry-After 指定的暂停时长
    pub retry_after: Duration,
    pub requests_per_minute: u32,
}

/// 单次查询的结果
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// 服务返回了订单当前的计算状态
    Order(AccrualOrder),
    /// 请求被限流，订单状态未知
    Throttled(QuotaUpdate),
}

/// 积分计算服务的抽象接口
///
/// 实现须在取消信号触发时尽快返回 `AccrualError::Cancelled`。
#[async_trait]
pub trait AccrualClient: Send + Sync {
    /// 查询单个订单的计算结果
    async fn fetch(&self, order_number: &str, cancel: &CancellationToken) -> Result<FetchOutcome>;
}

// ---------------------------------------------------------------------------
// HTTP 实现
// ---------------------------------------------------------------------------

/// 基于 reqwest 的积分计算服务客户端
///
/// reqwest::Client 内部带连接池，clone 是廉价操作。
pub struct HttpAccrualClient {
    http: reqwest::Client,
    base_url: String,
    limiter: Arc<AdaptiveRateLimiter>,
}

impl HttpAccrualClient {
    /// 创建客户端
    ///
    /// `base_url` 缺少协议时按 http 处理，末尾的 `/` 会被去掉。
    pub fn new(
        base_url: &str,
        request_timeout: Duration,
        limiter: Arc<AdaptiveRateLimiter>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AccrualError::AccrualUnavailable(format!("HTTP 客户端初始化失败: {e}")))?;

        let base_url = normalize_base_url(base_url);
        info!(base_url = %base_url, timeout_ms = request_timeout.as_millis() as u64, "积分计算服务客户端已初始化");

        Ok(Self {
            http,
            base_url,
            limiter,
        })
    }

    async fn send(&self, order_number: &str) -> Result<FetchOutcome> {
        let url = format!("{}/api/orders/{}", self.base_url, order_number);
        debug!(order_number, url = %url, "查询订单积分");

        let response = self.http.get(&url).send().await?;
        let status = response.status();

        match status {
            StatusCode::OK => {
                let order: AccrualOrder = response.json().await?;
                validate_accrual(&order)?;
                Ok(FetchOutcome::Order(order))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = parse_retry_after(
                    response
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok()),
                )?;
                let body = response.text().await?;
                let requests_per_minute = parse_quota_body(&body)?;

                Ok(FetchOutcome::Throttled(QuotaUpdate {
                    retry_after,
                    requests_per_minute,
                }))
            }
            other => Err(AccrualError::AccrualUnavailable(format!(
                "非预期的响应状态码: {other}"
            ))),
        }
    }
}

#[async_trait]
impl AccrualClient for HttpAccrualClient {
    async fn fetch(&self, order_number: &str, cancel: &CancellationToken) -> Result<FetchOutcome> {
        self.limiter.wait(cancel).await?;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AccrualError::Cancelled),
            result = self.send(order_number) => result,
        };

        match &result {
            Ok(FetchOutcome::Order(order)) => {
                metrics::record_accrual_request("ok");
                debug!(order_number, status = %order.status, accrual = ?order.accrual, "收到订单计算结果");
            }
            Ok(FetchOutcome::Throttled(quota)) => {
                metrics::record_accrual_request("throttled");
                metrics::record_accrual_throttle(quota.requests_per_minute);
                info!(
                    order_number,
                    retry_after_secs = quota.retry_after.as_secs(),
                    requests_per_minute = quota.requests_per_minute,
                    "积分计算服务限流"
                );
            }
            Err(e) => {
                metrics::record_accrual_request("error");
                debug!(order_number, error = %e, "积分计算服务请求失败");
            }
        }

        result
    }
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

/// 解析 Retry-After 头（整数秒）
fn parse_retry_after(header: Option<&str>) -> Result<Duration> {
    let value = header.ok_or_else(|| {
        AccrualError::MalformedAccrualResponse("限流响应缺少 Retry-After 头".to_string())
    })?;

    let invalid = || AccrualError::MalformedAccrualResponse(format!("无效的 Retry-After: {value}"));
    let retry_after = value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| invalid())?;

    if retry_after > MAX_RETRY_AFTER {
        return Err(invalid());
    }
    Ok(retry_after)
}

/// 积分只能是有限的非负数
fn validate_accrual(order: &AccrualOrder) -> Result<()> {
    match order.accrual {
        Some(amount) if !amount.is_finite() || amount < 0.0 => Err(
            AccrualError::MalformedAccrualResponse(format!("订单 {} 的积分无效: {amount}", order.order)),
        ),
        _ => Ok(()),
    }
}

/// 解析形如 "No more than N requests per minute allowed" 的限流说明
fn parse_quota_body(body: &str) -> Result<u32> {
    let malformed = || AccrualError::MalformedAccrualResponse(format!("无效的限流说明: {body}"));

    let count = body
        .trim()
        .strip_prefix(QUOTA_BODY_PREFIX)
        .and_then(|rest| rest.strip_suffix(QUOTA_BODY_SUFFIX))
        .ok_or_else(malformed)?;

    match count.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(malformed()),
    }
}
