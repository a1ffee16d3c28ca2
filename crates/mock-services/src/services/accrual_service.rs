//! Mock 积分计算服务
//!
//! 对外接口与真实服务一致：
//! - GET /api/orders/{number}：200 返回当前计算状态，未登记的订单返回 204，
//!   超出配额返回 429（Retry-After + 配额说明）
//! - POST /api/orders：登记订单及其状态脚本（仅 mock 提供）

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tracing::{debug, info, warn};

use crate::models::{AccrualResponse, AccrualScript, RegisterOrderRequest};
use crate::quota::QuotaWindow;
use crate::store::MemoryStore;

/// 积分计算服务状态
pub struct AccrualServiceState {
    pub orders: MemoryStore<AccrualScript>,
    /// None 表示不限流
    quota: Option<QuotaWindow>,
    /// 登记时未提供脚本的订单最终获得的积分
    default_accrual: f64,
    served: AtomicU64,
    throttled: AtomicU64,
}

impl AccrualServiceState {
    pub fn new(quota: Option<QuotaWindow>, default_accrual: f64) -> Self {
        Self {
            orders: MemoryStore::new(),
            quota,
            default_accrual,
            served: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
        }
    }

    /// 登记订单，已存在时返回 false
    pub fn register(&self, number: &str, script: AccrualScript) -> bool {
        self.orders.insert_if_absent(number, script)
    }

    /// 已返回 200 的查询次数
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    /// 已返回 429 的查询次数
    pub fn throttled(&self) -> u64 {
        self.throttled.load(Ordering::Relaxed)
    }
}

impl Default for AccrualServiceState {
    fn default() -> Self {
        Self::new(None, 100.0)
    }
}

/// 构建积分计算服务路由
pub fn accrual_routes() -> Router<Arc<AccrualServiceState>> {
    Router::new()
        .route("/api/orders", post(register_order))
        .route("/api/orders/{number}", get(get_order))
}

/// 查询订单计算结果
///
/// GET /api/orders/{number}
async fn get_order(
    State(state): State<Arc<AccrualServiceState>>,
    Path(number): Path<String>,
) -> Response {
    let rejected = state
        .quota
        .as_ref()
        .and_then(|quota| quota.try_acquire().err().map(|retry| (quota, retry)));
    if let Some((quota, retry_after)) = rejected {
        state.throttled.fetch_add(1, Ordering::Relaxed);
        let body = format!(
            "No more than {} requests per minute allowed",
            quota.advertised_requests_per_minute()
        );
        warn!(order_number = %number, retry_after, "超出请求配额");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after.to_string())],
            body,
        )
            .into_response();
    }

    let Some(step) = state.orders.update(&number, |script| script.advance()) else {
        debug!(order_number = %number, "订单未登记");
        return StatusCode::NO_CONTENT.into_response();
    };

    state.served.fetch_add(1, Ordering::Relaxed);
    debug!(order_number = %number, status = ?step.status, accrual = ?step.accrual, "返回订单计算结果");

    Json(AccrualResponse {
        order: number,
        status: step.status,
        accrual: step.accrual,
    })
    .into_response()
}

/// 登记订单
///
/// POST /api/orders
async fn register_order(
    State(state): State<Arc<AccrualServiceState>>,
    Json(req): Json<RegisterOrderRequest>,
) -> StatusCode {
    let script = match req.steps {
        Some(steps) => AccrualScript::new(steps),
        None => AccrualScript::standard(state.default_accrual),
    };

    if state.register(&req.order, script) {
        info!(order_number = %req.order, "订单已登记");
        StatusCode::ACCEPTED
    } else {
        warn!(order_number = %req.order, "订单重复登记");
        StatusCode::CONFLICT
    }
}
